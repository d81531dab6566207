//! Site-specific stock checking and checkout, selected by URL pattern.

pub mod selector;

pub use selector::SelectorStorefront;

use crate::config::schema::ShopCredentials;
use crate::error::{Error, Result};
use crate::session::PooledSession;
use crate::shop::ShopKind;
use crate::target::Target;
use async_trait::async_trait;
use std::sync::Arc;

/// Reference to a challenge shown instead of the product page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeData {
    pub url: String,
}

/// Result of one stock check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockStatus {
    pub in_stock: bool,
    /// Only the add-to-cart control is offered, no direct buy.
    pub cart_only: bool,
    pub challenge: Option<ChallengeData>,
}

impl StockStatus {
    pub fn out_of_stock() -> Self {
        Self::default()
    }

    pub fn in_stock() -> Self {
        Self {
            in_stock: true,
            ..Self::default()
        }
    }

    pub fn challenged(url: impl Into<String>) -> Self {
        Self {
            challenge: Some(ChallengeData { url: url.into() }),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Storefront: Send + Sync {
    fn name(&self) -> &str;

    async fn check_stock(&self, session: &PooledSession, target: &Target) -> Result<StockStatus>;

    /// Loads the product page in `session`.
    async fn open(&self, session: &PooledSession, target: &Target) -> Result<()>;

    /// Price of the product on the current page.
    async fn read_price(&self, session: &PooledSession) -> Result<f64>;

    /// Clicks through the purchase on the current page.
    async fn place_order(&self, session: &PooledSession, target: &Target, use_cart: bool) -> Result<()>;

    async fn submit_challenge(&self, session: &PooledSession, solution: &str) -> Result<()>;

    /// Logs a checkout session into the shop account before it is parked.
    async fn sign_in(&self, _session: &PooledSession, _credentials: &ShopCredentials) -> Result<()> {
        Ok(())
    }

    /// Keeps a parked checkout session logged in.
    async fn keep_alive(&self, _session: &PooledSession) -> Result<()> {
        Ok(())
    }

    /// Buys the target, refusing when the observed price is outside its
    /// bounds or cannot be read.
    async fn checkout(&self, session: &PooledSession, target: &Target, use_cart: bool) -> Result<()> {
        self.open(session, target).await?;
        // an unknown price is never inside the bounds
        let price = match self.read_price(session).await {
            Ok(price) => price,
            Err(e) => {
                log::info!("No readable price for {}: {}", target.name, e);
                f64::NAN
            }
        };
        target.bounds.ensure(price)?;
        log::info!("Price {:.2} of {} within bounds, ordering", price, target.name);
        self.place_order(session, target, use_cart).await
    }
}

/// Storefronts keyed by a URL substring, matched in registration order.
#[derive(Default, Clone)]
pub struct StorefrontRegistry {
    entries: Vec<(String, Arc<dyn Storefront>)>,
}

impl StorefrontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pattern: impl Into<String>, storefront: Arc<dyn Storefront>) {
        self.entries.push((pattern.into(), storefront));
    }

    pub fn with(mut self, pattern: impl Into<String>, storefront: Arc<dyn Storefront>) -> Self {
        self.register(pattern, storefront);
        self
    }

    pub fn resolve(&self, url: &str) -> Result<(Arc<dyn Storefront>, ShopKind)> {
        self.entries
            .iter()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, storefront)| (storefront.clone(), ShopKind::from_url(url)))
            .ok_or_else(|| Error::NoStorefront(url.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses a displayed price such as `€61`, `$1,299.00` or `1.299,00 €`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            if dot > comma {
                cleaned.replace(',', "")
            } else {
                cleaned.replace('.', "").replace(',', ".")
            }
        }
        (Some(_), None) => single_separator(&cleaned, '.'),
        (None, Some(_)) => single_separator(&cleaned, ','),
        (None, None) => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

// Repeated separators, or exactly three trailing digits, mean grouping.
fn single_separator(cleaned: &str, sep: char) -> String {
    let count = cleaned.matches(sep).count();
    let decimals = cleaned.rsplit(sep).next().map(str::len).unwrap_or(0);
    if count > 1 || decimals == 3 {
        cleaned.replace(sep, "")
    } else {
        cleaned.replace(sep, ".")
    }
}
