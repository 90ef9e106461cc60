// src/http.rs
//! Network seam: plain HTTP GET for pages (text) and icons (bytes).
//!
//! Everything that touches the network goes through [`PageSource`], so the fetcher
//! and the image manager can be exercised against in-memory sources in tests.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("http status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Production source backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestSource {
    http: reqwest::Client,
}

impl ReqwestSource {
    /// `timeout` bounds a single request; retries are the caller's business.
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout.min(Duration::from_secs(4)).max(Duration::from_millis(1)))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageSource for ReqwestSource {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}
