use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// The storefront family a URL belongs to. Proxy cooldowns are tracked per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopKind {
    Amazon,
    AmazonNl,
    AmazonDe,
    AmazonFr,
    AmazonIt,
    Other,
}

impl ShopKind {
    pub fn from_url(raw: &str) -> Self {
        let host = Url::parse(raw)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_else(|| raw.to_ascii_lowercase());

        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));

        if matches("amazon.com") {
            ShopKind::Amazon
        } else if matches("amazon.nl") {
            ShopKind::AmazonNl
        } else if matches("amazon.de") {
            ShopKind::AmazonDe
        } else if matches("amazon.fr") {
            ShopKind::AmazonFr
        } else if matches("amazon.it") {
            ShopKind::AmazonIt
        } else {
            ShopKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShopKind::Amazon => "amazon",
            ShopKind::AmazonNl => "amazon_nl",
            ShopKind::AmazonDe => "amazon_de",
            ShopKind::AmazonFr => "amazon_fr",
            ShopKind::AmazonIt => "amazon_it",
            ShopKind::Other => "other",
        }
    }
}

impl fmt::Display for ShopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
