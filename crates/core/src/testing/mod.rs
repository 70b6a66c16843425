//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the storefront-facing traits
//! so runners and the task manager can be exercised without a network.
//!
//! # Example
//!
//! ```rust,ignore
//! use cartrunner_core::testing::{fixtures, MockGateway, MockParser};
//!
//! let feed = MockParser::new("feed");
//! feed.push(Ok(fixtures::sized_product(&[("9", true)]))).await;
//!
//! let gateway = MockGateway::new();
//! gateway.push(CheckoutState::AddToCart, Ok(StepResponse { status: 422, ..Default::default() })).await;
//! ```

mod mock_gateway;
mod mock_notifier;
mod mock_parser;

pub use mock_gateway::MockGateway;
pub use mock_notifier::MockNotifier;
pub use mock_parser::{MockParser, MockParserFactory};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::monitor::{Product, Variant};
    use crate::proxy::ProxyLease;
    use crate::task::{
        Address, CheckoutMode, Delays, Payment, Platform, ProductSelector, Profile, Site, Task,
    };

    /// The storefront every fixture task targets.
    pub fn site() -> Site {
        Site {
            name: "Example Shop".to_string(),
            url: "https://shop.example".to_string(),
            platform: Platform::Shopify,
            api_key: None,
            captcha_site_key: None,
        }
    }

    /// A buyer profile with a card that never gets charged.
    pub fn profile() -> Profile {
        Profile {
            name: "Default".to_string(),
            email: "buyer@example.com".to_string(),
            shipping: Address {
                first_name: "Jane".to_string(),
                last_name: "Doe".to_string(),
                address1: "1 Main St".to_string(),
                address2: None,
                city: "Springfield".to_string(),
                province: "IL".to_string(),
                zip: "62701".to_string(),
                country: "US".to_string(),
                phone: "5550100".to_string(),
            },
            billing: None,
            payment: Payment {
                holder: "Jane Doe".to_string(),
                number: "4242424242424242".to_string(),
                exp_month: "12".to_string(),
                exp_year: "2030".to_string(),
                cvv: "123".to_string(),
            },
        }
    }

    /// A safe-mode task looking for "runner" in any size.
    pub fn keyword_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            site: site(),
            selector: ProductSelector::Keywords {
                positive: vec!["runner".to_string()],
                negative: vec![],
            },
            sizes: vec!["Random".to_string()],
            random_in_stock: false,
            profile: profile(),
            delays: Delays::default(),
            hook: None,
            account: None,
            mode: CheckoutMode::Safe,
        }
    }

    /// [`keyword_task`] with explicit sizes.
    pub fn sized_task(id: &str, sizes: &[&str]) -> Task {
        Task {
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
            ..keyword_task(id)
        }
    }

    /// A lease for proxy `pN`, reachable at `10.0.0.N:8080`.
    pub fn lease(id: &str) -> ProxyLease {
        let n = id.trim_start_matches('p');
        let raw = format!("10.0.0.{}:8080", n);
        ProxyLease {
            id: id.to_string(),
            url: format!("http://{}", raw),
            raw,
        }
    }

    /// A product with a single in-stock variant.
    pub fn product(title: &str, handle: &str) -> Product {
        Product {
            title: title.to_string(),
            handle: handle.to_string(),
            url: Some(format!("https://shop.example/products/{}", handle)),
            image: Some(format!("https://cdn.example/{}.jpg", handle)),
            variants: vec![Variant {
                id: format!("{}-1", handle),
                title: "Default Title".to_string(),
                price: Some("100.00".to_string()),
                available: true,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// The "Runner" product with one variant per `(size, available)` pair.
    pub fn sized_product(sizes: &[(&str, bool)]) -> Product {
        Product {
            variants: sizes
                .iter()
                .enumerate()
                .map(|(i, (size, available))| Variant {
                    id: format!("{}", 4000 + i),
                    title: size.to_string(),
                    price: Some("180.00".to_string()),
                    available: *available,
                    option1: Some(size.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..product("Runner", "runner")
        }
    }
}
