use crate::enricher::Enricher;
use crate::error::EnrichError;
use crate::record::{LogRecord, EVENT_KEY, LEVEL_KEY, SOURCE_LOCATION_KEY};
use crate::severity::Severity;
use crate::trace::trace_header;
use http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Metadata, Span, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Span field the layer reads the `X-Cloud-Trace-Context` value from.
pub const TRACE_CONTEXT_FIELD: &str = "cloud_trace_context";

/// Create the span to run a request handler in.
///
/// Events recorded inside it, or inside any of its children, get the
/// request's trace correlation.
pub fn request_span(headers: &HeaderMap) -> Span {
    tracing::info_span!("request", cloud_trace_context = trace_header(headers))
}

/// What the layer does with an event whose project id lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataFailurePolicy {
    /// Drop the event and count it in `dropped_events`.
    #[default]
    Drop,
    /// Write the event without any trace fields.
    EmitWithoutTrace,
}

/// Event counters shared between the layer and whoever installed it.
#[derive(Debug, Clone, Default)]
pub struct LayerCounters {
    /// Total events seen by the layer.
    pub total_events: Arc<AtomicU64>,
    /// Written to the output.
    pub emitted_events: Arc<AtomicU64>,
    /// Not written because enrichment, serialization or the write failed.
    pub dropped_events: Arc<AtomicU64>,
}

impl LayerCounters {
    pub fn total(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted_events.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

/// `tracing_subscriber` layer that turns every event into a Cloud Logging
/// JSON line.
///
/// The event message becomes the record's event text, its level the
/// severity, and its fields pass through. The trace header is taken from
/// the nearest enclosing span that recorded [`TRACE_CONTEXT_FIELD`], see
/// [`request_span`]. Lines are written synchronously through `W`.
pub struct CloudLoggingLayer<W = fn() -> io::Stdout> {
    enricher: Enricher,
    make_writer: W,
    include_source_location: bool,
    on_metadata_error: MetadataFailurePolicy,
    counters: LayerCounters,
}

impl CloudLoggingLayer {
    pub fn new(enricher: Enricher) -> Self {
        Self {
            enricher,
            make_writer: io::stdout,
            include_source_location: true,
            on_metadata_error: MetadataFailurePolicy::default(),
            counters: LayerCounters::default(),
        }
    }
}

impl<W> CloudLoggingLayer<W> {
    pub fn with_writer<W2>(self, make_writer: W2) -> CloudLoggingLayer<W2>
    where
        W2: for<'w> MakeWriter<'w> + 'static,
    {
        CloudLoggingLayer {
            enricher: self.enricher,
            make_writer,
            include_source_location: self.include_source_location,
            on_metadata_error: self.on_metadata_error,
            counters: self.counters,
        }
    }

    pub fn with_source_location(mut self, include: bool) -> Self {
        self.include_source_location = include;
        self
    }

    pub fn with_metadata_failure_policy(mut self, policy: MetadataFailurePolicy) -> Self {
        self.on_metadata_error = policy;
        self
    }

    pub fn counters(&self) -> LayerCounters {
        self.counters.clone()
    }

    fn event_record(&self, event: &Event<'_>) -> LogRecord {
        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let meta = event.metadata();
        let mut record = LogRecord::from(fields);
        record.insert(LEVEL_KEY, Severity::from(*meta.level()).as_str());
        if let Some(message) = message {
            record.insert(EVENT_KEY, message);
        }
        if self.include_source_location {
            record.insert(SOURCE_LOCATION_KEY, source_location(meta));
        }
        record
    }

    fn enrich(&self, record: LogRecord, header: Option<&str>) -> Result<LogRecord, EnrichError> {
        let fallback = (header.is_some()
            && self.on_metadata_error == MetadataFailurePolicy::EmitWithoutTrace)
            .then(|| record.clone());

        match self.enricher.enrich_with_trace_header(record, &[], header) {
            Err(EnrichError::MetadataUnavailable(e)) => match fallback {
                Some(record) => {
                    eprintln!("project id unavailable, logging without trace: {}", e);
                    self.enricher.enrich_with_trace_header(record, &[], None)
                }
                None => Err(EnrichError::MetadataUnavailable(e)),
            },
            other => other,
        }
    }

    fn drop_event(&self, reason: &dyn std::fmt::Display) {
        self.counters.dropped_events.fetch_add(1, Ordering::Relaxed);
        eprintln!("dropping log record: {}", reason);
    }
}

fn source_location(meta: &Metadata<'_>) -> Value {
    let mut location = Map::new();
    if let Some(file) = meta.file() {
        location.insert("file".to_string(), Value::from(file));
    }
    if let Some(line) = meta.line() {
        location.insert("line".to_string(), Value::from(line));
    }
    location.insert(
        "function".to_string(),
        Value::from(meta.module_path().unwrap_or_else(|| meta.target())),
    );
    Value::Object(location)
}

/// Trace header stored in the extensions of the span that recorded it.
struct SpanTraceHeader(String);

impl<S, W> Layer<S> for CloudLoggingLayer<W>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = TraceHeaderVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(header), Some(span)) = (visitor.header, ctx.span(id)) {
            span.extensions_mut().replace(SpanTraceHeader(header));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = TraceHeaderVisitor::default();
        values.record(&mut visitor);
        if let (Some(header), Some(span)) = (visitor.header, ctx.span(id)) {
            span.extensions_mut().replace(SpanTraceHeader(header));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.counters.total_events.fetch_add(1, Ordering::Relaxed);

        let header = ctx.event_scope(event).and_then(|scope| {
            scope.into_iter().find_map(|span| {
                let extensions = span.extensions();
                extensions.get::<SpanTraceHeader>().map(|h| h.0.clone())
            })
        });

        let record = match self.enrich(self.event_record(event), header.as_deref()) {
            Ok(record) => record,
            Err(e) => return self.drop_event(&e),
        };
        let mut line = match record.to_json_line() {
            Ok(line) => line,
            Err(e) => return self.drop_event(&e),
        };
        line.push('\n');

        let mut writer = self.make_writer.make_writer_for(event.metadata());
        match writer.write_all(line.as_bytes()) {
            Ok(()) => {
                self.counters.emitted_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.drop_event(&e),
        }
    }
}

#[derive(Default)]
struct TraceHeaderVisitor {
    header: Option<String>,
}

impl Visit for TraceHeaderVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == TRACE_CONTEXT_FIELD {
            self.header = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == TRACE_CONTEXT_FIELD {
            self.header = unwrap_debug_text(&format!("{:?}", value));
        }
    }
}

/// Recover the header text from a `?`-recorded value: `%display` values
/// come through as-is, `Option`s lose their `Some(..)` and quoted strings
/// (`&str`, `String`, `HeaderValue`) are unquoted. `None` records nothing.
fn unwrap_debug_text(rendered: &str) -> Option<String> {
    let mut text = rendered.trim();
    loop {
        if text == "None" {
            return None;
        }
        match text.strip_prefix("Some(").and_then(|t| t.strip_suffix(')')) {
            Some(inner) => text = inner.trim(),
            None => break,
        }
    }

    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(quoted) => Some(quoted.replace("\\\"", "\"").replace("\\\\", "\\")),
        None => Some(text.to_string()),
    }
}

/// Collects event fields as JSON values; the `message` field is kept apart.
pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // `info!("...")` hands the message over as `fmt::Arguments`.
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_recorded_headers_are_unquoted() {
        let value = http::HeaderValue::from_static("abc123/1;o=1");
        assert_eq!(
            unwrap_debug_text(&format!("{:?}", Some(&value))).as_deref(),
            Some("abc123/1;o=1")
        );
        assert_eq!(
            unwrap_debug_text(&format!("{:?}", String::from("def/1"))).as_deref(),
            Some("def/1")
        );
        assert_eq!(unwrap_debug_text("plain/2").as_deref(), Some("plain/2"));
        assert_eq!(unwrap_debug_text(&format!("{:?}", None::<&str>)), None);
    }
}
