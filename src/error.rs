use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Not enough suitable proxies: requested {requested}, eligible {eligible}")]
    InsufficientProxies { requested: usize, eligible: usize },

    #[error("Failed to start browser session: {0}")]
    DriverInit(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("No storefront registered for {0}")]
    NoStorefront(String),

    #[error("Storefront error: {0}")]
    Storefront(String),

    #[error("Challenge does not have a URL")]
    MissingChallengeUrl,

    #[error("Price {price} outside of bounds [{min}, {max}]")]
    PriceOutOfRange { price: f64, min: f64, max: f64 },

    #[error("Could not read a price: {0}")]
    PriceUnreadable(String),

    #[error("Captcha solver error: {0}")]
    Solver(String),

    #[error("No captcha solution within {0:?}")]
    SolverTimeout(Duration),

    #[error("Captcha solve was cancelled")]
    SolveCancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
