use crate::config::{env_or, Settings};
use anyhow::Context;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// A single read-only GET. Implementations never retry.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP fetcher that identifies as a desktop browser and fails fast.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: reqwest::Client,
}

impl FetchClient {
    pub fn from_settings(_settings: &Settings) -> anyhow::Result<Self> {
        let user_agent = std::env::var("FETCH_USER_AGENT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let timeout_secs = env_or("FETCH_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);

        Self::new(&user_agent, Duration::from_secs(timeout_secs))
    }

    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("failed to build fetch http client")?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl Fetch for FetchClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = res.bytes().await.map_err(|e| transport_error(url, e))?;
        Ok(body.to_vec())
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
