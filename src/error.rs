//! Error types shared across the dashboard.
//!
//! [`FetchError`] is what a single poll attempt can fail with; it is carried
//! inside [`crate::poll::PollResult::Failed`] so it must be [`Clone`].
//! [`ConfigError`] is only produced at startup, before the terminal is set up.

use std::path::PathBuf;

use thiserror::Error;

/// Text shown to the user for any failed attempt, whatever the cause.
pub const FETCH_FAILED_MESSAGE: &str = "Error found when fetching from API";

/// Why a poll attempt produced no data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network, DNS or connection failure, including a body that could not
    /// be read to completion.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body was not valid JSON.
    #[error("invalid JSON body: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Parse(e.to_string())
    }
}

/// Problems with the startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("interval for {feed} must be greater than zero")]
    ZeroInterval { feed: String },
}
