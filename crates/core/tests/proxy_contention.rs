//! Proxy contention integration tests.
//!
//! Runners on the same site never share a proxy, bans move runners to a
//! fresh proxy, and every reservation is returned when a task ends.

mod common;

use std::time::Duration;

use cartrunner_core::{
    checkout::{CheckoutState, StepResponse},
    proxy::BanLevel,
    testing::fixtures,
};
use common::TestHarness;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_one_proxy_is_never_shared_on_a_site() {
    let harness = TestHarness::new();
    harness.manager.register_proxies(&["10.0.0.1:8080"]).await;

    harness.manager.start(fixtures::keyword_task("t1")).await.unwrap();
    harness.manager.start(fixtures::keyword_task("t2")).await.unwrap();

    let tasks = harness.manager.tasks().await;
    let with_proxy: Vec<_> = tasks.iter().filter(|t| t.proxy.is_some()).collect();
    assert_eq!(with_proxy.len(), 1);
    assert_eq!(with_proxy[0].task_id, "t1");
    assert_eq!(with_proxy[0].proxy.as_deref(), Some("10.0.0.1:8080"));

    // Stopping the holder returns the proxy to the pool.
    harness.manager.stop("t1").await.unwrap();
    assert!(harness.wait_for_tasks(1, TIMEOUT).await);
    let summaries = harness.manager.proxies().await;
    assert!(summaries[0].in_use.is_empty());

    harness.manager.shutdown().await;
    assert!(harness.wait_until_idle(TIMEOUT).await);
}

#[tokio::test]
async fn test_rate_limited_task_moves_to_fresh_proxy() {
    let harness = TestHarness::new();
    harness
        .manager
        .register_proxies(&["10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.3:8080"])
        .await;
    harness
        .gateway
        .push(
            CheckoutState::GetSiteData,
            Ok(StepResponse {
                status: 429,
                ..Default::default()
            }),
        )
        .await;
    harness
        .parsers
        .feed()
        .push(Ok(fixtures::sized_product(&[("9", true)])))
        .await;

    harness.manager.start(fixtures::sized_task("t1", &["9"])).await.unwrap();

    let last = harness.wait_for_done("t1", TIMEOUT).await;
    assert_eq!(last.as_deref(), Some("Payment successful"));
    assert!(harness.wait_until_idle(TIMEOUT).await);

    let messages = harness.messages("t1").await;
    assert!(messages.contains(&"Proxy banned!".to_string()));
    assert!(messages.iter().any(|m| m.starts_with("Swapped proxy to: 10.0.0.")));

    let requests = harness.gateway.requests().await;
    let first = requests[0].proxy.as_ref().map(|p| p.id.clone());
    let second = requests[1].proxy.as_ref().map(|p| p.id.clone());
    assert!(first.is_some() && second.is_some());
    assert_ne!(first, second);

    let summaries = harness.pool.summaries().await;
    let banned: Vec<_> = summaries.iter().filter(|s| !s.bans.is_empty()).collect();
    assert_eq!(banned.len(), 1);
    assert_eq!(banned[0].bans[0].1, BanLevel::Soft);
    assert!(summaries.iter().all(|s| s.in_use.is_empty()));
}

#[tokio::test]
async fn test_deregistered_proxy_forces_swap() {
    let harness = TestHarness::new();
    harness.manager.register_proxies(&["10.0.0.1:8080"]).await;
    harness.manager.start(fixtures::keyword_task("t1")).await.unwrap();
    assert!(
        harness
            .wait_for_status("t1", |e| e.message == "Waiting for product", TIMEOUT)
            .await
    );

    let removed = harness.manager.deregister_proxies(&["10.0.0.1:8080"]).await;
    assert_eq!(removed, 1);

    assert!(
        harness
            .wait_for_status("t1", |e| e.message == "Swapped proxy to: localhost", TIMEOUT)
            .await
    );
    assert!(harness.manager.proxies().await.is_empty());

    harness.manager.shutdown().await;
    assert!(harness.wait_until_idle(TIMEOUT).await);
}
