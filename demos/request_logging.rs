use http::{HeaderMap, HeaderValue};
use tracing::{info, warn, Instrument};

use tracing_cloud_logging::init::{init_cloud_logging_with_config, LoggingConfig};
use tracing_cloud_logging::request_span;

async fn handle(headers: HeaderMap) {
    async {
        info!(path = "/orders/17", "handling request");
        warn!(retry = 1, "inventory service slow");
    }
    .instrument(request_span(&headers))
    .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LoggingConfig {
        project_id: Some("my-proj".to_string()),
        ..LoggingConfig::from_env()
    };
    let logging = init_cloud_logging_with_config(config)?;

    info!("service started");

    let mut headers = HeaderMap::new();
    headers.insert(
        "x-cloud-trace-context",
        HeaderValue::from_static("105445aa7843bc8bf206b12000100000/1;o=1"),
    );
    handle(headers).await;

    logging.flush();
    Ok(())
}
