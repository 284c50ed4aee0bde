use http::{HeaderMap, HeaderValue};
use serde_json::json;
use std::sync::Arc;

use tracing_cloud_logging::metadata::EnvProjectId;
use tracing_cloud_logging::{CloudLogger, Enricher};

/// Logging without `tracing`: one logger built at startup, headers passed
/// per request. Set `GOOGLE_CLOUD_PROJECT` before running.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logger = CloudLogger::stdout(Enricher::new(Arc::new(EnvProjectId::default())));

    logger.bind().bind("component", "startup").info("listening on port %d", &[json!(8080)])?;

    let mut headers = HeaderMap::new();
    headers.insert("x-cloud-trace-context", HeaderValue::from_static("abc123/456;o=1"));

    let log = logger.request(&headers).bind("user", "ana");
    if let Err(e) = log.info("fetched %d orders for %s", &[json!(3), json!("ana")]) {
        // Without a project id the traced record is refused rather than
        // written half-correlated.
        eprintln!("log call failed: {}", e);
    }

    logger.flush()?;
    Ok(())
}
