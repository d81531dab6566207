//! Page-interaction driver: the only code that talks to a browser.

pub mod chromium;

pub use chromium::{ChromiumDriver, ChromiumOptions};

use crate::error::Result;
use crate::proxy::ProxyEndpoint;
use async_trait::async_trait;

/// Handle to one live browser instance, as issued by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriverSession {
    pub id: String,
}

impl DriverSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Opaque reference to an element located on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

#[async_trait]
pub trait Driver: Send + Sync {
    /// Opens a browser, routed through `proxies` when non-empty.
    async fn create_session(&self, proxies: &[ProxyEndpoint]) -> Result<DriverSession>;
    async fn quit(&self, session: &DriverSession) -> Result<()>;

    async fn navigate(&self, session: &DriverSession, url: &str) -> Result<()>;
    async fn find(&self, session: &DriverSession, css: &str) -> Result<Option<ElementRef>>;
    async fn text(&self, session: &DriverSession, element: &ElementRef) -> Result<String>;
    async fn attribute(
        &self,
        session: &DriverSession,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>>;
    async fn click(&self, session: &DriverSession, element: &ElementRef) -> Result<()>;
    async fn send_keys(&self, session: &DriverSession, element: &ElementRef, text: &str) -> Result<()>;
    /// PNG bytes of the current viewport.
    async fn screenshot(&self, session: &DriverSession) -> Result<Vec<u8>>;

    /// Releases whatever the driver still holds open.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
