//! Data source abstraction layer.
//!
//! A [`Source`] describes one remote feed: a stable id, an [`Endpoint`] to
//! fetch from, how often to fetch, and a [`Normalize`] rule that turns a raw
//! JSON body into an ordered list of [`Record`]s.  Sources carry no state of
//! their own; [`crate::poll::start`] owns the timer and the result slot.
//!
//! ## For contributors: adding a new feed
//!
//! 1. Build a `Source` with [`Source::new`] and the right [`Endpoint`].
//! 2. If the service answers with something other than an array of records
//!    or a single object, supply a custom normalizer with
//!    [`Source::with_normalize`].
//! 3. Register it in [`crate::feeds::build`] so it gets a panel.

mod endpoint;
mod record;

pub use endpoint::{Endpoint, Target, DEFAULT_SAMPLE_BOUND};
pub use record::Record;

use std::time::Duration;

use serde_json::Value;

/// Interval used when a source does not set one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// Maps a parsed response body to records, newest first.
pub type Normalize = fn(Value) -> Vec<Record>;

/// One independently polled remote feed.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub endpoint: Endpoint,
    pub interval: Duration,
    pub normalize: Normalize,
}

impl Source {
    pub fn new(id: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
            interval: DEFAULT_INTERVAL,
            normalize: records,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_normalize(mut self, normalize: Normalize) -> Self {
        self.normalize = normalize;
        self
    }
}

/// The default normalization rule.
///
/// * An array body yields its elements in order (possibly none).
/// * `null` yields no records.
/// * Anything else is a single record, unchanged.
pub fn records(body: Value) -> Vec<Record> {
    match body {
        Value::Array(items) => items.into_iter().map(Record::new).collect(),
        Value::Null => Vec::new(),
        other => vec![Record::new(other)],
    }
}

/// Like [`records`], but keeps only JSON objects.
///
/// For services that answer a missing resource with a bare string body
/// ("Statistics do not exist."); such a body then counts as no data.
pub fn object_records(body: Value) -> Vec<Record> {
    records(body)
        .into_iter()
        .filter(|r| r.as_value().is_object())
        .collect()
}

/// The record shown as "latest": the first one, if there is any.
pub fn latest(records: &[Record]) -> Option<&Record> {
    records.first()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
