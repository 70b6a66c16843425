//! Monitor sharing integration tests.
//!
//! Tasks after the same product on the same site share one monitor; each
//! still gets the variant for its own sizes.

mod common;

use std::time::Duration;

use cartrunner_core::{task::ProductSelector, testing::fixtures};
use common::TestHarness;

const TIMEOUT: Duration = Duration::from_secs(5);

fn keywords(positive: &[&str]) -> ProductSelector {
    ProductSelector::Keywords {
        positive: positive.iter().map(|s| s.to_string()).collect(),
        negative: vec![],
    }
}

#[tokio::test]
async fn test_equivalent_keywords_share_one_monitor() {
    let harness = TestHarness::new();

    let mut a = fixtures::sized_task("a", &["8"]);
    a.selector = keywords(&["Runner", "OG"]);
    let mut b = fixtures::sized_task("b", &["9"]);
    b.selector = keywords(&["og", " runner "]);
    let mut c = fixtures::sized_task("c", &["10"]);
    c.selector = keywords(&["runner", "og"]);

    for task in [a, b, c] {
        harness.manager.start(task).await.unwrap();
    }
    assert_eq!(harness.manager.status().await.monitors, 1);

    let mut product = fixtures::sized_product(&[("8", true), ("9", true), ("10", true)]);
    product.title = "Runner OG".into();
    harness.parsers.feed().push(Ok(product)).await;

    for id in ["a", "b", "c"] {
        let last = harness.wait_for_done(id, TIMEOUT).await;
        assert_eq!(last.as_deref(), Some("Payment successful"), "task {}", id);
    }
    assert!(harness.wait_until_idle(TIMEOUT).await);

    let mut sizes: Vec<String> = harness
        .gateway
        .requests()
        .await
        .into_iter()
        .filter_map(|r| r.session.size)
        .collect();
    sizes.sort();
    sizes.dedup();
    assert_eq!(sizes, vec!["10".to_string(), "8".to_string(), "9".to_string()]);
}

#[tokio::test]
async fn test_different_targets_get_their_own_monitor() {
    let harness = TestHarness::new();

    let keyword = fixtures::keyword_task("k");
    let mut by_url = fixtures::keyword_task("u");
    by_url.selector = ProductSelector::Url {
        url: "https://shop.example/products/runner".into(),
    };
    let mut by_variant = fixtures::keyword_task("v");
    by_variant.selector = ProductSelector::Variant { id: "4000".into() };

    harness.manager.start(keyword).await.unwrap();
    harness.manager.start(by_url).await.unwrap();
    harness.manager.start(by_variant).await.unwrap();

    // The variant monitor resolves without parsing and goes away.
    let last = harness.wait_for_done("v", TIMEOUT).await;
    assert_eq!(last.as_deref(), Some("Payment successful"));

    assert!(harness.wait_for_tasks(2, TIMEOUT).await);
    assert_eq!(harness.manager.status().await.monitors, 2);

    harness.manager.shutdown().await;
    assert!(harness.wait_until_idle(TIMEOUT).await);
    assert_eq!(harness.manager.status().await.monitors, 0);
}

#[tokio::test]
async fn test_shared_monitor_survives_one_subscriber_leaving() {
    let harness = TestHarness::new();
    harness.manager.start(fixtures::sized_task("a", &["8"])).await.unwrap();
    harness.manager.start(fixtures::sized_task("b", &["9"])).await.unwrap();

    harness.manager.stop("a").await.unwrap();
    assert_eq!(harness.manager.status().await.monitors, 1);
    assert_eq!(
        harness.manager.monitor_peers("b").await.unwrap(),
        vec!["b".to_string()]
    );

    harness
        .parsers
        .feed()
        .push(Ok(fixtures::sized_product(&[("8", true), ("9", true)])))
        .await;
    let last = harness.wait_for_done("b", TIMEOUT).await;
    assert_eq!(last.as_deref(), Some("Payment successful"));
    assert!(harness.wait_until_idle(TIMEOUT).await);
}
