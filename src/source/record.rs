//! The unit of data every feed produces.
//!
//! A `Record` is one JSON value taken from a response body: an element of an
//! array body, or the whole body when it is a single object.  The polling
//! core never looks inside it; only the renderer reads fields, and every
//! accessor returns an `Option` so a missing field can never take the
//! dashboard down.
//!
//! ## For contributors
//!
//! Don't add typed fields here.  The upstream services disagree on shape
//! (analyzer events, stats objects, anomaly rows), so rendering code picks
//! the fields it knows about with [`Record::text`] and falls back to the raw
//! JSON otherwise.

use serde_json::Value;

/// One opaque record from a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Record(Value);

impl Record {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Raw field lookup.  `None` for missing fields and for records that are
    /// not JSON objects.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.as_object()?.get(name)
    }

    /// A field rendered as display text.
    ///
    /// Strings are returned without quotes; numbers, booleans and nested
    /// values use their JSON form.  `null` counts as missing.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn to_json(&self) -> String {
        self.0.to_string()
    }

    /// Indented JSON for the focused panel.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.to_json())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
