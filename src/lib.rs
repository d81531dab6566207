pub mod capture;
pub mod captcha;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod process;
pub mod proxy;
pub mod selector;
pub mod session;
pub mod shop;
pub mod shutdown;
pub mod storefront;
pub mod target;

pub use engine::MonitorEngine;
pub use error::{Error, Result};
pub use metrics::collector::MetricsCollector;
pub use metrics::snapshot::MetricsSnapshot;
pub use monitor::{MonitorExit, MonitorState};
pub use shop::ShopKind;
pub use storefront::{Storefront, StorefrontRegistry};
pub use target::Target;
