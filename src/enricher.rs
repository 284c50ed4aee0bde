use chrono::{DateTime, SecondsFormat, Utc};
use http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{EnrichError, LogError};
use crate::format::format_positional;
use crate::metadata::MetadataProvider;
use crate::record::{
    LogRecord, EVENT_KEY, LEVEL_KEY, MESSAGE_KEY, SEVERITY_KEY, SPAN_ID_KEY, TIMESTAMP_KEY,
    TRACE_KEY, TRACE_SAMPLED_KEY,
};
use crate::trace::{trace_header, TraceContext};

/// Source of the time written into `timestamp`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Which trace fields the trace stage writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceFields {
    /// Only `logging.googleapis.com/trace`.
    #[default]
    TraceOnly,
    /// Also `spanId` and `trace_sampled` when the header carries them.
    WithSpan,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnricherConfig {
    pub trace_fields: TraceFields,
}

/// Moves `level` to `severity`, keeping the value as given.
pub fn normalize_level(record: &mut LogRecord) -> Result<(), EnrichError> {
    match record.remove(LEVEL_KEY) {
        Some(Value::Null) | None => Err(EnrichError::MissingLevel),
        Some(level) => {
            record.insert(SEVERITY_KEY, level);
            Ok(())
        }
    }
}

/// Substitutes positional `args` into the `event` text when it has
/// matching placeholders.
pub fn format_positional_args(record: &mut LogRecord, args: &[Value]) {
    let formatted = record
        .get_str(EVENT_KEY)
        .and_then(|event| format_positional(event, args));
    if let Some(message) = formatted {
        record.insert(EVENT_KEY, message);
    }
}

/// Moves `event` to `message`. A missing or null event leaves no `message`.
pub fn rename_event(record: &mut LogRecord) {
    match record.remove(EVENT_KEY) {
        Some(Value::Null) | None => {}
        Some(event) => {
            record.insert(MESSAGE_KEY, event);
        }
    }
}

/// Adds the Cloud Logging trace field when `header` carries a trace id.
///
/// The project id is looked up only when there is something to correlate,
/// and before the record is touched, so a failed lookup leaves it as it was.
pub fn add_trace(
    record: &mut LogRecord,
    header: Option<&str>,
    metadata: &dyn MetadataProvider,
    fields: TraceFields,
) -> Result<(), EnrichError> {
    let Some(ctx) = header.and_then(TraceContext::parse) else {
        return Ok(());
    };
    let project_id = metadata.project_id()?;

    record.insert(TRACE_KEY, ctx.resource_name(&project_id));
    if fields == TraceFields::WithSpan {
        if let Some(span_id) = ctx.span_id {
            record.insert(SPAN_ID_KEY, span_id);
        }
        if let Some(sampled) = ctx.sampled {
            record.insert(TRACE_SAMPLED_KEY, sampled);
        }
    }
    Ok(())
}

/// Sets `timestamp` to `now` as RFC 3339 in UTC with microseconds.
pub fn stamp_timestamp(record: &mut LogRecord, now: DateTime<Utc>) {
    record.insert(TIMESTAMP_KEY, now.to_rfc3339_opts(SecondsFormat::Micros, true));
}

/// Turns raw log calls into Cloud Logging records.
///
/// Holds the two outside dependencies of the pipeline, the project id
/// lookup and the clock, so every stage stays deterministic for fixed
/// inputs. Build one at startup and share it by reference or `Clone`.
#[derive(Clone)]
pub struct Enricher {
    metadata: Arc<dyn MetadataProvider>,
    clock: Arc<dyn Clock>,
    config: EnricherConfig,
}

impl Enricher {
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            metadata,
            clock: Arc::new(SystemClock),
            config: EnricherConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EnricherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    /// Run every stage on `record`, taking the trace header from `headers`.
    pub fn enrich(
        &self,
        record: LogRecord,
        args: &[Value],
        headers: Option<&HeaderMap>,
    ) -> Result<LogRecord, EnrichError> {
        self.enrich_with_trace_header(record, args, headers.and_then(trace_header))
    }

    /// Same as [`enrich`](Self::enrich) for callers that already hold the raw
    /// `X-Cloud-Trace-Context` value.
    pub fn enrich_with_trace_header(
        &self,
        mut record: LogRecord,
        args: &[Value],
        trace_header: Option<&str>,
    ) -> Result<LogRecord, EnrichError> {
        normalize_level(&mut record)?;
        format_positional_args(&mut record, args);
        rename_event(&mut record);
        add_trace(&mut record, trace_header, &*self.metadata, self.config.trace_fields)?;
        stamp_timestamp(&mut record, self.clock.now());
        Ok(record)
    }

    /// Enrich and serialize to a single JSON line (no trailing newline).
    pub fn render(
        &self,
        record: LogRecord,
        args: &[Value],
        headers: Option<&HeaderMap>,
    ) -> Result<String, LogError> {
        Ok(self.enrich(record, args, headers)?.to_json_line()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetadataError;
    use crate::metadata::StaticProjectId;
    use crate::severity::Severity;
    use chrono::TimeZone;
    use serde_json::json;

    fn enricher() -> Enricher {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        Enricher::new(Arc::new(StaticProjectId::new("my-proj"))).with_clock(Arc::new(FixedClock(at)))
    }

    #[test]
    fn level_is_copied_verbatim() {
        let mut record = LogRecord::new().with_field(LEVEL_KEY, "warning");
        normalize_level(&mut record).unwrap();
        assert_eq!(record.get_str(SEVERITY_KEY), Some("warning"));
        assert!(!record.contains_key(LEVEL_KEY));
    }

    #[test]
    fn null_level_counts_as_missing() {
        let mut record = LogRecord::new().with_field(LEVEL_KEY, Value::Null);
        assert!(matches!(normalize_level(&mut record), Err(EnrichError::MissingLevel)));
    }

    #[test]
    fn non_string_event_passes_through() {
        let mut record = LogRecord::new().with_field(EVENT_KEY, 42);
        format_positional_args(&mut record, &[json!(1)]);
        rename_event(&mut record);
        assert_eq!(record.get(MESSAGE_KEY), Some(&json!(42)));
    }

    #[test]
    fn trace_lookup_skipped_without_header() {
        let failing = || Err::<String, _>(MetadataError::Pending);
        let mut record = LogRecord::new();
        add_trace(&mut record, None, &failing, TraceFields::TraceOnly).unwrap();
        add_trace(&mut record, Some("no-slash"), &failing, TraceFields::TraceOnly).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn span_fields_are_opt_in() {
        let provider = StaticProjectId::new("p");
        let mut plain = LogRecord::new();
        add_trace(&mut plain, Some("t/7;o=1"), &provider, TraceFields::TraceOnly).unwrap();
        assert!(!plain.contains_key(SPAN_ID_KEY));

        let mut full = LogRecord::new();
        add_trace(&mut full, Some("t/7;o=1"), &provider, TraceFields::WithSpan).unwrap();
        assert_eq!(full.get_str(TRACE_KEY), Some("projects/p/traces/t"));
        assert_eq!(full.get_str(SPAN_ID_KEY), Some("7"));
        assert_eq!(full.get(TRACE_SAMPLED_KEY), Some(&json!(true)));
    }

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let mut record = LogRecord::new();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        stamp_timestamp(&mut record, at);
        assert_eq!(record.get_str(TIMESTAMP_KEY), Some("2024-03-01T12:30:00.000000Z"));
    }

    #[test]
    fn full_pipeline() {
        let record = LogRecord::for_event(Severity::Info, "served %s").with_field("status", 200);
        let out = enricher()
            .enrich_with_trace_header(record, &[json!("/index")], Some("abc123/456;o=1"))
            .unwrap();

        let expected: LogRecord = [
            (SEVERITY_KEY, json!("INFO")),
            (MESSAGE_KEY, json!("served /index")),
            (TIMESTAMP_KEY, json!("2024-03-01T12:30:00.000000Z")),
            (TRACE_KEY, json!("projects/my-proj/traces/abc123")),
            ("status", json!(200)),
        ]
        .into_iter()
        .collect();
        assert_eq!(out, expected);
    }
}
