//! Startup configuration.
//!
//! Everything is resolved once before the first source starts and never
//! re-read.  Precedence, highest first: command-line flag or environment
//! variable, TOML file, built-in defaults.  The defaults match the stock
//! service layout (processing on 8100, analyzer on 8110, anomaly detector on
//! 8120, checker on 8130).
//!
//! ```toml
//! host = "http://analytics.internal"
//!
//! [analyzer]
//! endpoints = ["refills", "dispenses"]
//! stats_interval_ms = 3000
//!
//! [anomalies]
//! interval_ms = 10000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::source::DEFAULT_SAMPLE_BOUND;

pub const DEFAULT_HOST: &str = "http://localhost";
pub const DEFAULT_LOG_FILE: &str = "/tmp/pollboard.log";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Base URL of the deployment; a bare host name gets `http://`.
    pub host: String,
    pub log_file: PathBuf,
    pub processing: ProcessingConfig,
    pub analyzer: AnalyzerConfig,
    pub anomalies: AnomalyConfig,
    pub check: CheckConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            processing: ProcessingConfig::default(),
            analyzer: AnalyzerConfig::default(),
            anomalies: AnomalyConfig::default(),
            check: CheckConfig::default(),
        }
    }
}

/// Processing service: aggregate stats.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub port: u16,
    pub base_path: String,
    pub stats_path: String,
    pub interval_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            port: 8100,
            base_path: String::new(),
            stats_path: "stats".to_string(),
            interval_ms: 5000,
        }
    }
}

/// Analyzer service: per-event-type samples plus its own stats.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub port: u16,
    pub base_path: String,
    /// One sampled feed per entry, fetched at `{base_path}/{endpoint}`.
    pub endpoints: Vec<String>,
    pub sample_param: String,
    /// Sample indices are drawn from `[0, sample_bound)`.
    pub sample_bound: u32,
    pub interval_ms: u64,
    pub stats_path: String,
    pub stats_interval_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            port: 8110,
            base_path: "/analyzer".to_string(),
            endpoints: vec!["refills".to_string(), "dispenses".to_string()],
            sample_param: "index".to_string(),
            sample_bound: DEFAULT_SAMPLE_BOUND,
            interval_ms: 5000,
            stats_path: "stats".to_string(),
            stats_interval_ms: 3000,
        }
    }
}

/// Anomaly detector: one feed per category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub port: u16,
    pub base_path: String,
    pub path: String,
    pub interval_ms: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            port: 8120,
            base_path: "/anomaly_detector".to_string(),
            path: "anomalies".to_string(),
            interval_ms: 5000,
        }
    }
}

/// Service health checker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub enabled: bool,
    pub port: u16,
    pub base_path: String,
    pub path: String,
    pub interval_ms: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8130,
            base_path: "/check".to_string(),
            path: "checks".to_string(),
            interval_ms: 5000,
        }
    }
}

impl DashboardConfig {
    /// Load from `path`, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every value a source will be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        let intervals = [
            ("processing", self.processing.interval_ms),
            ("analyzer", self.analyzer.interval_ms),
            ("analyzer stats", self.analyzer.stats_interval_ms),
            ("anomalies", self.anomalies.interval_ms),
            ("check", self.check.interval_ms),
        ];
        for (feed, ms) in intervals {
            if ms == 0 {
                return Err(ConfigError::ZeroInterval {
                    feed: feed.to_string(),
                });
            }
        }
        Ok(())
    }

    /// The configured host as an absolute URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::InvalidHost {
                host: self.host.clone(),
                reason: "empty".to_string(),
            });
        }

        let with_scheme = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };

        let url = Url::parse(&with_scheme).map_err(|e| ConfigError::InvalidHost {
            host: self.host.clone(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(ConfigError::InvalidHost {
                host: self.host.clone(),
                reason: "not an absolute http(s) URL".to_string(),
            });
        }
        Ok(url)
    }

    /// `{host}:{port}{base_path}/{leaf}` with any query string cleared.
    pub fn service_url(&self, port: u16, base_path: &str, leaf: &str) -> Result<Url, ConfigError> {
        let mut url = self.base_url()?;
        url.set_port(Some(port))
            .map_err(|()| ConfigError::InvalidHost {
                host: self.host.clone(),
                reason: "cannot carry a port".to_string(),
            })?;

        let base = base_path.trim_matches('/');
        let leaf = leaf.trim_matches('/');
        let path = match (base.is_empty(), leaf.is_empty()) {
            (true, _) => format!("/{leaf}"),
            (false, true) => format!("/{base}"),
            (false, false) => format!("/{base}/{leaf}"),
        };
        url.set_path(&path);
        url.set_query(None);
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
