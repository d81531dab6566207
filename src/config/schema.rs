use crate::selector::CssSelector;
use crate::shop::ShopKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Everything the engine needs before the first monitor starts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_has_targets"))]
pub struct AppConfig {
    #[serde(default)]
    #[validate]
    pub global: GlobalConfig,

    #[serde(default)]
    #[validate]
    pub targets: Vec<TargetConfig>,

    #[serde(default)]
    #[validate]
    pub proxies: Vec<ProxyConfig>,

    #[serde(default)]
    #[validate]
    pub storefronts: Vec<StorefrontConfig>,

    /// Optional path to a parent configuration file to inherit from
    #[serde(default)]
    pub extends: Option<String>,
}

/// A year. Longer cooldowns are rejected at load time.
pub const MAX_PROXY_LIFETIME_MINUTES: i64 = 525_600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_shop_lifetimes"))]
pub struct GlobalConfig {
    #[serde(default = "default_check_interval")]
    #[validate(range(min = 1))]
    pub check_interval_ms: u64,

    /// Upper bound of the random delay added to every poll interval.
    #[serde(default)]
    pub jitter_ms: u64,

    /// Minutes a released proxy rests before reuse; -1 disables rotation.
    #[serde(default = "default_proxy_lifetime")]
    #[validate(range(min = -1, max = 525600))]
    pub proxy_lifetime_minutes: i64,

    #[serde(default)]
    pub solver_endpoint: Option<String>,

    #[serde(default = "default_solve_timeout")]
    #[validate(range(min = 1))]
    pub solve_timeout_secs: u64,

    /// Browser executable; detected on the host when unset.
    #[serde(default)]
    pub chrome_path: Option<String>,

    #[serde(default)]
    pub headless: bool,

    #[serde(default = "default_profile_dir")]
    pub profile_dir: String,

    #[serde(default = "default_navigation_timeout")]
    #[validate(range(min = 1))]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_capture_dir")]
    pub capture_dir: String,

    #[serde(default = "default_extension_dir")]
    pub extension_dir: String,

    #[serde(default = "default_keepalive")]
    pub checkout_keepalive_secs: u64,

    /// Process names force-killed at the end of shutdown.
    #[serde(default = "default_kill_processes")]
    pub kill_processes: Vec<String>,

    /// Per shop kind feature flags, keyed by `ShopKind` name (e.g. "amazon_de").
    #[serde(default)]
    pub shops: HashMap<ShopKind, ShopSettings>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval(),
            jitter_ms: 0,
            proxy_lifetime_minutes: default_proxy_lifetime(),
            solver_endpoint: None,
            solve_timeout_secs: default_solve_timeout(),
            chrome_path: None,
            headless: false,
            profile_dir: default_profile_dir(),
            navigation_timeout_secs: default_navigation_timeout(),
            capture_dir: default_capture_dir(),
            extension_dir: default_extension_dir(),
            checkout_keepalive_secs: default_keepalive(),
            kill_processes: default_kill_processes(),
            shops: HashMap::new(),
        }
    }
}

impl GlobalConfig {
    pub fn shop(&self, kind: ShopKind) -> ShopSettings {
        self.shops.get(&kind).cloned().unwrap_or_default()
    }

    /// Proxy lifetime for a shop kind, honoring the per-shop override.
    pub fn proxy_lifetime(&self, kind: ShopKind) -> i64 {
        self.shop(kind)
            .proxy_lifetime_minutes
            .unwrap_or(self.proxy_lifetime_minutes)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn solve_timeout(&self) -> Duration {
        Duration::from_secs(self.solve_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopSettings {
    #[serde(default)]
    pub use_proxies: bool,

    /// Idle sessions kept around for checkout; 0 means monitors check out on
    /// their own session.
    #[serde(default)]
    pub checkout_instances: usize,

    #[serde(default)]
    pub debug_capture: bool,

    #[serde(default)]
    pub proxy_lifetime_minutes: Option<i64>,

    /// Account the checkout sessions of this shop kind sign in with.
    #[serde(default)]
    pub credentials: Option<ShopCredentials>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ShopCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_price_bounds"))]
pub struct TargetConfig {
    #[serde(default)]
    pub id: Option<String>,

    #[validate(length(min = 1))]
    pub name: String,

    #[validate(custom = "validate_target_url")]
    pub url: String,

    #[serde(default)]
    pub min_price: f64,

    #[serde(default = "default_max_price")]
    pub max_price: f64,

    #[serde(default = "default_threads")]
    #[validate(range(min = 1))]
    pub threads: usize,

    #[serde(default)]
    pub proxy_count: usize,

    /// 0 means no quota.
    #[serde(default)]
    pub max_purchases: u32,

    #[serde(default)]
    pub current_purchases: u32,

    #[serde(default)]
    pub monitor_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ProxyConfig {
    #[validate(length(min = 1))]
    pub ip: String,

    #[validate(range(min = 1))]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorefrontConfig {
    #[validate(length(min = 1))]
    pub name: String,

    /// URL substring that selects this storefront (e.g. "amazon.").
    #[validate(length(min = 1))]
    pub pattern: String,

    pub selectors: StorefrontSelectors,

    /// Page visited by checkout sessions to keep their login alive.
    #[serde(default)]
    pub keepalive_url: Option<String>,

    /// Login page opened by checkout sessions before they are parked.
    #[serde(default)]
    pub sign_in_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorefrontSelectors {
    pub buy_now: CssSelector,

    #[serde(default)]
    pub add_to_cart: Option<CssSelector>,

    #[serde(default)]
    pub price: Option<CssSelector>,

    #[serde(default)]
    pub captcha_image: Option<CssSelector>,

    #[serde(default)]
    pub captcha_input: Option<CssSelector>,

    #[serde(default)]
    pub captcha_submit: Option<CssSelector>,

    /// Final "place order" control clicked after buy-now / add-to-cart.
    #[serde(default)]
    pub confirm: Option<CssSelector>,

    #[serde(default)]
    pub sign_in_email: Option<CssSelector>,

    /// Clicked between the email and password steps when the login is split.
    #[serde(default)]
    pub sign_in_continue: Option<CssSelector>,

    #[serde(default)]
    pub sign_in_password: Option<CssSelector>,

    #[serde(default)]
    pub sign_in_submit: Option<CssSelector>,
}

fn validate_has_targets(config: &AppConfig) -> Result<(), ValidationError> {
    if config.targets.is_empty() {
        return Err(ValidationError::new("no_targets"));
    }
    Ok(())
}

fn validate_shop_lifetimes(global: &GlobalConfig) -> Result<(), ValidationError> {
    let in_range = |minutes: i64| (-1..=MAX_PROXY_LIFETIME_MINUTES).contains(&minutes);
    if global
        .shops
        .values()
        .filter_map(|settings| settings.proxy_lifetime_minutes)
        .any(|minutes| !in_range(minutes))
    {
        return Err(ValidationError::new("shop_proxy_lifetime"));
    }
    Ok(())
}

fn validate_price_bounds(target: &TargetConfig) -> Result<(), ValidationError> {
    if target.min_price < 0.0 || target.min_price > target.max_price {
        return Err(ValidationError::new("price_bounds"));
    }
    Ok(())
}

fn validate_target_url(url: &str) -> Result<(), ValidationError> {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => Err(ValidationError::new("target_url")),
    }
}

pub(crate) fn default_check_interval() -> u64 {
    10_000
}

pub(crate) fn default_proxy_lifetime() -> i64 {
    -1
}

pub(crate) fn default_solve_timeout() -> u64 {
    120
}

pub(crate) fn default_profile_dir() -> String {
    "browser-profiles".to_string()
}

pub(crate) fn default_navigation_timeout() -> u64 {
    30
}

pub(crate) fn default_capture_dir() -> String {
    "screenshots".to_string()
}

pub(crate) fn default_extension_dir() -> String {
    "proxy-extensions".to_string()
}

pub(crate) fn default_keepalive() -> u64 {
    15 * 60
}

pub(crate) fn default_kill_processes() -> Vec<String> {
    vec!["chrome".to_string(), "chromium".to_string()]
}

fn default_max_price() -> f64 {
    f64::MAX
}

fn default_threads() -> usize {
    1
}
