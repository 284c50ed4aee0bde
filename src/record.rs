use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::severity::Severity;

/// Key holding the raw level before the pipeline runs.
pub const LEVEL_KEY: &str = "level";
/// Key holding the raw event text before the pipeline runs.
pub const EVENT_KEY: &str = "event";

pub const SEVERITY_KEY: &str = "severity";
pub const MESSAGE_KEY: &str = "message";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const TRACE_KEY: &str = "logging.googleapis.com/trace";
pub const SPAN_ID_KEY: &str = "logging.googleapis.com/spanId";
pub const TRACE_SAMPLED_KEY: &str = "logging.googleapis.com/trace_sampled";
pub const SOURCE_LOCATION_KEY: &str = "logging.googleapis.com/sourceLocation";

/// A structured log entry: field name to JSON value.
///
/// A record starts life holding the call site's `level` and `event` keys
/// next to any caller fields, and is rewritten in place by the enrichment
/// stages until it carries the Cloud Logging keys instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRecord {
    fields: BTreeMap<String, Value>,
}

impl LogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a record for a log call with the given severity and event text.
    pub fn for_event(severity: Severity, event: impl Into<String>) -> Self {
        Self::new().with_level(severity).with_event(event)
    }

    pub fn with_level(mut self, severity: Severity) -> Self {
        self.insert(LEVEL_KEY, severity.as_str());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.insert(EVENT_KEY, event.into());
        self
    }

    /// Add an arbitrary caller field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String value of `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Copy every field of `other` into this record, overwriting on conflict.
    pub fn extend(&mut self, other: &LogRecord) {
        for (key, value) in other.iter() {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Render as one JSON object on a single line, without the trailing newline.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        // serde_json's compact writer escapes control characters inside
        // strings, so the output never spans more than one line.
        serde_json::to_string(&self.fields)
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.fields
    }
}

impl From<BTreeMap<String, Value>> for LogRecord {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for LogRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
