//! HTTP transport for poll attempts.
//!
//! The poller talks to the network through the [`Fetch`] trait so that tests
//! can substitute a scripted implementation and control exactly when each
//! attempt completes.  [`HttpFetcher`] is the real thing, backed by a pooled
//! [`reqwest::Client`].

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::error::FetchError;

/// Performs one GET and parses the body as JSON.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get_json(&self, url: &Url) -> Result<Value, FetchError>;
}

/// [`Fetch`] over plain HTTP.
///
/// No timeout is configured beyond the transport default, and the response
/// status is not treated as an error: the services answer failures with a
/// JSON body (`{"message": "Not Found"}`) that the dashboard shows as data.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "non-success status, using body as-is");
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
