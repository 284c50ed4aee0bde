use crate::enricher::{Enricher, EnricherConfig, TraceFields};
use crate::env::{
    env_flag, CLOUD_LOGGING_CONSOLE_ENV, CLOUD_LOGGING_METADATA_TIMEOUT_MS_ENV,
    CLOUD_LOGGING_PROJECT_ID_ENV, CLOUD_LOGGING_SOURCE_LOCATION_ENV,
    CLOUD_LOGGING_SPAN_CORRELATION_ENV, DEFAULT_METADATA_HOST, GCE_METADATA_HOST_ENV,
};
use crate::error::{InitError, MetadataError};
use crate::layer::{CloudLoggingLayer, LayerCounters, MetadataFailurePolicy};
use crate::metadata::{Backoff, EnvProjectId, MetadataProvider, StaticProjectId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Logging setup for a service.
///
/// **Fields**
/// - `project_id`: project to use in trace resource names. When `None`,
///   the `GOOGLE_CLOUD_PROJECT`/`GCP_PROJECT` variables are tried, then
///   the metadata server (feature `metadata-server`).
/// - `span_correlation`: also write `spanId` and `trace_sampled`.
/// - `include_source_location`: write `logging.googleapis.com/sourceLocation`.
/// - `on_metadata_error`: what to do with events whose project id lookup
///   failed.
/// - `enable_console`: if `true`, a `tracing_subscriber::fmt` layer also
///   prints events to stderr in human-readable form.
/// - `metadata_host`, `metadata_timeout`, `metadata_backoff`: metadata
///   server location, per-request timeout and retry schedule. The default
///   schedule gives up after 10 attempts, leaving traced events to
///   `on_metadata_error`.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub project_id: Option<String>,
    pub span_correlation: bool,
    pub include_source_location: bool,
    pub on_metadata_error: MetadataFailurePolicy,
    pub enable_console: bool,
    pub metadata_host: String,
    pub metadata_timeout: Duration,
    pub metadata_backoff: Backoff,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            span_correlation: false,
            include_source_location: true,
            on_metadata_error: MetadataFailurePolicy::Drop,
            enable_console: false,
            metadata_host: DEFAULT_METADATA_HOST.to_string(),
            metadata_timeout: Duration::from_secs(2),
            metadata_backoff: Backoff::default(),
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by the variables listed in [`crate::env`].
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let metadata_timeout = std::env::var(CLOUD_LOGGING_METADATA_TIMEOUT_MS_ENV)
            .ok()
            .and_then(|ms| ms.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.metadata_timeout);

        Self {
            project_id: std::env::var(CLOUD_LOGGING_PROJECT_ID_ENV)
                .ok()
                .filter(|id| !id.trim().is_empty()),
            span_correlation: env_flag(CLOUD_LOGGING_SPAN_CORRELATION_ENV, defaults.span_correlation),
            include_source_location: env_flag(
                CLOUD_LOGGING_SOURCE_LOCATION_ENV,
                defaults.include_source_location,
            ),
            enable_console: env_flag(CLOUD_LOGGING_CONSOLE_ENV, defaults.enable_console),
            metadata_host: std::env::var(GCE_METADATA_HOST_ENV)
                .unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string()),
            metadata_timeout,
            ..defaults
        }
    }

    pub fn enricher_config(&self) -> EnricherConfig {
        EnricherConfig {
            trace_fields: if self.span_correlation {
                TraceFields::WithSpan
            } else {
                TraceFields::TraceOnly
            },
        }
    }
}

/// Returned by the init functions.
pub struct LoggingHandle {
    counters: LayerCounters,
    project: Arc<dyn MetadataProvider>,
    resolver: Option<JoinHandle<()>>,
}

impl LoggingHandle {
    pub fn counters(&self) -> &LayerCounters {
        &self.counters
    }

    /// The project id as the layer currently sees it.
    pub fn project_id(&self) -> Result<String, MetadataError> {
        self.project.project_id()
    }

    /// Background metadata server lookup, if one was started.
    pub fn take_resolver(&mut self) -> Option<JoinHandle<()>> {
        self.resolver.take()
    }

    /// The layer writes every line straight through; nothing is buffered.
    pub fn flush(&self) {}
}

/// Pick the project id lookup described by `config`.
///
/// Returns the background task handle when the metadata server is queried.
pub fn project_provider(
    config: &LoggingConfig,
) -> Result<(Arc<dyn MetadataProvider>, Option<JoinHandle<()>>), InitError> {
    if let Some(id) = &config.project_id {
        return Ok((Arc::new(StaticProjectId::new(id.clone())), None));
    }
    if let Ok(id) = EnvProjectId::default().project_id() {
        return Ok((Arc::new(StaticProjectId::new(id)), None));
    }

    #[cfg(feature = "metadata-server")]
    {
        use crate::metadata::CachedProjectId;
        use crate::metadata_server::MetadataServer;

        tokio::runtime::Handle::try_current().map_err(|_| InitError::NoRuntime)?;
        let server = MetadataServer::new(&config.metadata_host, config.metadata_timeout)?;
        let (cache, handle) = CachedProjectId::spawn(Arc::new(server), config.metadata_backoff);
        Ok((cache as Arc<dyn MetadataProvider>, Some(handle)))
    }

    #[cfg(not(feature = "metadata-server"))]
    {
        Ok((Arc::new(EnvProjectId::default()), None))
    }
}

/// Build the layer `init_cloud_logging_with_config` installs, for callers
/// assembling their own subscriber.
pub fn build_layer(config: &LoggingConfig, project: Arc<dyn MetadataProvider>) -> CloudLoggingLayer {
    let enricher = Enricher::new(project).with_config(config.enricher_config());
    CloudLoggingLayer::new(enricher)
        .with_source_location(config.include_source_location)
        .with_metadata_failure_policy(config.on_metadata_error)
}

/// Install a [`Registry`] with a [`CloudLoggingLayer`] writing to stdout as
/// the global default subscriber.
///
/// When the project id has to come from the metadata server this must be
/// called inside a Tokio runtime; the lookup runs in the background and
/// events that need it before it completes are handled per
/// `config.on_metadata_error`.
pub fn init_cloud_logging_with_config(config: LoggingConfig) -> Result<LoggingHandle, InitError> {
    let (project, resolver) = project_provider(&config)?;
    let layer = build_layer(&config, Arc::clone(&project));
    let counters = layer.counters();

    // Two branches because the subscriber type differs with the extra layer.
    let installed = if config.enable_console {
        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    };

    if let Err(e) = installed {
        if let Some(handle) = &resolver {
            handle.abort();
        }
        return Err(e.into());
    }

    Ok(LoggingHandle {
        counters,
        project,
        resolver,
    })
}

/// Initialize with [`LoggingConfig::from_env`].
pub fn init_cloud_logging() -> Result<LoggingHandle, InitError> {
    init_cloud_logging_with_config(LoggingConfig::from_env())
}
