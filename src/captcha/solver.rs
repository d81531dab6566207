use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Outcome of an external solve request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    Solved(String),
    /// The service vetoed the request (duplicate, expired, ...).
    Cancelled,
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, challenge_url: &str, endpoint: &str) -> Result<SolveOutcome>;
}

#[derive(Debug, Deserialize)]
struct SolverResponse {
    #[serde(default)]
    output: String,
}

/// Image-captcha solver reachable over HTTP.
///
/// Sends `POST <endpoint>` with the challenge image in the `captchaURL` header
/// and expects `{"output": "<characters>"}`. An empty output is a cancellation.
pub struct HttpSolver {
    client: Client,
}

impl HttpSolver {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("stockwatch/0.1")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CaptchaSolver for HttpSolver {
    async fn solve(&self, challenge_url: &str, endpoint: &str) -> Result<SolveOutcome> {
        let res = self
            .client
            .post(endpoint)
            .header("captchaURL", challenge_url)
            .send()
            .await
            .map_err(|e| Error::Solver(format!("failed to reach {}: {}", endpoint, e)))?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::Solver(format!("solver answered HTTP {}", status)));
        }

        let body: SolverResponse = res
            .json()
            .await
            .map_err(|e| Error::Solver(format!("unreadable solver response: {}", e)))?;

        let output = body.output.trim();
        if output.is_empty() {
            Ok(SolveOutcome::Cancelled)
        } else {
            Ok(SolveOutcome::Solved(output.to_string()))
        }
    }
}
