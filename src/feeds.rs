//! The set of feeds the dashboard shows.
//!
//! [`build`] turns a validated [`DashboardConfig`] into one [`Feed`] per
//! panel.  Feeds never share data; each one pairs a [`Source`] for the poller
//! with the [`FeedKind`] that tells the renderer how to present its records.

use std::time::Duration;

use url::Url;

use crate::config::DashboardConfig;
use crate::error::ConfigError;
use crate::source::{self, Endpoint, Source};

/// Anomaly categories served by the anomaly detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyCategory {
    TooHigh,
    TooLow,
}

impl AnomalyCategory {
    pub const ALL: [AnomalyCategory; 2] = [AnomalyCategory::TooHigh, AnomalyCategory::TooLow];

    /// Value of the `anomaly_type` query parameter.
    pub fn query_value(self) -> &'static str {
        match self {
            AnomalyCategory::TooHigh => "TooHigh",
            AnomalyCategory::TooLow => "TooLow",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AnomalyCategory::TooHigh => "too high",
            AnomalyCategory::TooLow => "too low",
        }
    }

    /// The event type this category is raised for.
    pub fn event_type(self) -> &'static str {
        match self {
            AnomalyCategory::TooHigh => "Dispense",
            AnomalyCategory::TooLow => "Refill",
        }
    }
}

/// How a feed's records are presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedKind {
    /// A random analyzer sample for one event type.
    Sample { endpoint: String },
    /// Aggregate numbers shown as JSON.
    Stats,
    /// Per-service status strings.
    Checks,
    /// The latest anomaly of one category.
    Anomaly(AnomalyCategory),
}

/// Row of the dashboard a feed is drawn in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeedGroup {
    Overview,
    Analyzer,
    Anomalies,
}

impl FeedKind {
    pub fn group(&self) -> FeedGroup {
        match self {
            FeedKind::Stats | FeedKind::Checks => FeedGroup::Overview,
            FeedKind::Sample { .. } => FeedGroup::Analyzer,
            FeedKind::Anomaly(_) => FeedGroup::Anomalies,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feed {
    pub title: String,
    pub kind: FeedKind,
    pub source: Source,
}

/// Build every feed the configuration asks for, in display order.
pub fn build(config: &DashboardConfig) -> Result<Vec<Feed>, ConfigError> {
    config.validate()?;
    let mut feeds = Vec::new();

    let processing = &config.processing;
    feeds.push(Feed {
        title: "Processing Stats".to_string(),
        kind: FeedKind::Stats,
        source: Source::new(
            "processing-stats",
            Endpoint::fixed(config.service_url(
                processing.port,
                &processing.base_path,
                &processing.stats_path,
            )?),
        )
        .with_interval(Duration::from_millis(processing.interval_ms))
        .with_normalize(source::object_records),
    });

    let analyzer = &config.analyzer;
    feeds.push(Feed {
        title: "Analyzer Stats".to_string(),
        kind: FeedKind::Stats,
        source: Source::new(
            "analyzer-stats",
            Endpoint::fixed(config.service_url(
                analyzer.port,
                &analyzer.base_path,
                &analyzer.stats_path,
            )?),
        )
        .with_interval(Duration::from_millis(analyzer.stats_interval_ms))
        .with_normalize(source::object_records),
    });

    let check = &config.check;
    if check.enabled {
        feeds.push(Feed {
            title: "Service Status".to_string(),
            kind: FeedKind::Checks,
            source: Source::new(
                "service-checks",
                Endpoint::fixed(config.service_url(check.port, &check.base_path, &check.path)?),
            )
            .with_interval(Duration::from_millis(check.interval_ms))
            .with_normalize(source::object_records),
        });
    }

    for endpoint in &analyzer.endpoints {
        let url = config.service_url(analyzer.port, &analyzer.base_path, endpoint)?;
        feeds.push(Feed {
            title: endpoint.clone(),
            kind: FeedKind::Sample {
                endpoint: endpoint.clone(),
            },
            source: Source::new(
                format!("analyzer-{endpoint}"),
                Endpoint::sampled(url, analyzer.sample_param.clone(), analyzer.sample_bound),
            )
            .with_interval(Duration::from_millis(analyzer.interval_ms)),
        });
    }

    let anomalies = &config.anomalies;
    for category in AnomalyCategory::ALL {
        let url = anomaly_url(
            config.service_url(anomalies.port, &anomalies.base_path, &anomalies.path)?,
            category,
        );
        feeds.push(Feed {
            title: format!("{} Anomalies ({})", category.event_type(), category.label()),
            kind: FeedKind::Anomaly(category),
            source: Source::new(format!("anomalies-{}", category.query_value()), Endpoint::fixed(url))
                .with_interval(Duration::from_millis(anomalies.interval_ms)),
        });
    }

    Ok(feeds)
}

fn anomaly_url(mut url: Url, category: AnomalyCategory) -> Url {
    url.query_pairs_mut()
        .append_pair("anomaly_type", category.query_value());
    url
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
