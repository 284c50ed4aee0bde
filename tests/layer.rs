use http::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use std::io;
use std::sync::{Arc, Mutex};
use tracing::{error, info, info_span, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use tracing_cloud_logging::layer::{request_span, MetadataFailurePolicy};
use tracing_cloud_logging::metadata::{CachedProjectId, StaticProjectId};
use tracing_cloud_logging::record::{
    MESSAGE_KEY, SEVERITY_KEY, SOURCE_LOCATION_KEY, TIMESTAMP_KEY, TRACE_KEY,
};
use tracing_cloud_logging::{CloudLoggingLayer, Enricher};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn json_lines(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8(bytes.clone())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn trace_headers(value: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-cloud-trace-context", HeaderValue::from_static(value));
    headers
}

fn static_layer(capture: &Capture) -> CloudLoggingLayer<Capture> {
    CloudLoggingLayer::new(Enricher::new(Arc::new(StaticProjectId::new("my-proj"))))
        .with_writer(capture.clone())
}

#[test]
fn events_become_cloud_logging_lines() {
    let capture = Capture::default();
    let subscriber = Registry::default().with(static_layer(&capture));

    tracing::subscriber::with_default(subscriber, || {
        warn!(user_id = 42, ratio = 0.5, cached = true, "quota at {}%", 90);
    });

    let lines = capture.json_lines();
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert_eq!(line[SEVERITY_KEY], json!("WARNING"));
    assert_eq!(line[MESSAGE_KEY], json!("quota at 90%"));
    assert_eq!(line["user_id"], json!(42));
    assert_eq!(line["ratio"], json!(0.5));
    assert_eq!(line["cached"], json!(true));
    assert!(line[TIMESTAMP_KEY].as_str().unwrap().ends_with('Z'));
    assert!(line.get("level").is_none());
    assert!(line.get("event").is_none());
    assert!(line.get(TRACE_KEY).is_none());

    let location = &line[SOURCE_LOCATION_KEY];
    assert!(location["file"].as_str().unwrap().ends_with("layer.rs"));
    assert!(location["line"].is_u64());
}

#[test]
fn source_location_can_be_disabled() {
    let capture = Capture::default();
    let layer = static_layer(&capture).with_source_location(false);

    tracing::subscriber::with_default(Registry::default().with(layer), || {
        info!("plain");
    });

    assert!(capture.json_lines()[0].get(SOURCE_LOCATION_KEY).is_none());
}

#[test]
fn events_in_request_span_are_trace_correlated() {
    let capture = Capture::default();
    let subscriber = Registry::default().with(static_layer(&capture));
    let headers = trace_headers("abc123/456;o=1");

    tracing::subscriber::with_default(subscriber, || {
        info!("before request");
        let span = request_span(&headers);
        let _guard = span.enter();
        info!("handling request");
        let child = info_span!("db_query");
        let _child = child.enter();
        error!("query failed");
    });

    let lines = capture.json_lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].get(TRACE_KEY).is_none());
    assert_eq!(lines[1][TRACE_KEY], json!("projects/my-proj/traces/abc123"));
    assert_eq!(lines[2][TRACE_KEY], json!("projects/my-proj/traces/abc123"));
    assert_eq!(lines[2][SEVERITY_KEY], json!("ERROR"));
}

#[test]
fn request_without_trace_header_is_not_correlated() {
    let capture = Capture::default();
    let subscriber = Registry::default().with(static_layer(&capture));

    tracing::subscriber::with_default(subscriber, || {
        let span = request_span(&HeaderMap::new());
        let _guard = span.enter();
        info!("anonymous");
        let bad = request_span(&trace_headers("no-slash-here"));
        let _bad = bad.enter();
        info!("malformed");
    });

    let lines = capture.json_lines();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line.get(TRACE_KEY).is_none()));
}

#[test]
fn trace_header_recorded_after_span_creation() {
    let capture = Capture::default();
    let subscriber = Registry::default().with(static_layer(&capture));

    tracing::subscriber::with_default(subscriber, || {
        let span = info_span!("request", cloud_trace_context = tracing::field::Empty);
        let _guard = span.enter();
        span.record("cloud_trace_context", "late/1");
        info!("recorded late");
    });

    assert_eq!(
        capture.json_lines()[0][TRACE_KEY],
        json!("projects/my-proj/traces/late")
    );
}

#[test]
fn debug_recorded_trace_header_is_unwrapped() {
    let capture = Capture::default();
    let subscriber = Registry::default().with(static_layer(&capture));
    let headers = trace_headers("abc123/456;o=1");

    tracing::subscriber::with_default(subscriber, || {
        let header = headers.get("x-cloud-trace-context");
        let span = info_span!("request", cloud_trace_context = ?header);
        let _guard = span.enter();
        info!("from header value");

        let owned = info_span!("request", cloud_trace_context = ?String::from("def/1"));
        let _owned = owned.enter();
        info!("from owned string");
    });

    let lines = capture.json_lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0][TRACE_KEY], json!("projects/my-proj/traces/abc123"));
    assert_eq!(lines[1][TRACE_KEY], json!("projects/my-proj/traces/def"));
}

#[test]
fn unresolved_project_drops_traced_events_by_default() {
    let capture = Capture::default();
    let layer = CloudLoggingLayer::new(Enricher::new(Arc::new(CachedProjectId::new())))
        .with_writer(capture.clone());
    let counters = layer.counters();
    let headers = trace_headers("abc123/456;o=1");

    tracing::subscriber::with_default(Registry::default().with(layer), || {
        info!("untraced is fine");
        let span = request_span(&headers);
        let _guard = span.enter();
        info!("traced needs the project id");
    });

    let lines = capture.json_lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0][MESSAGE_KEY], json!("untraced is fine"));
    assert_eq!(counters.total(), 2);
    assert_eq!(counters.emitted(), 1);
    assert_eq!(counters.dropped(), 1);
}

#[test]
fn unresolved_project_can_emit_without_trace() {
    let capture = Capture::default();
    let layer = CloudLoggingLayer::new(Enricher::new(Arc::new(CachedProjectId::new())))
        .with_writer(capture.clone())
        .with_metadata_failure_policy(MetadataFailurePolicy::EmitWithoutTrace);
    let counters = layer.counters();
    let headers = trace_headers("abc123/456;o=1");

    tracing::subscriber::with_default(Registry::default().with(layer), || {
        let span = request_span(&headers);
        let _guard = span.enter();
        info!("still logged");
    });

    let lines = capture.json_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].get(TRACE_KEY).is_none());
    assert_eq!(counters.dropped(), 0);
}
