/// Error returned when the cloud project id cannot be obtained.
#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("project id has not been resolved yet")]
    Pending,

    #[error("none of the environment variables {0:?} is set")]
    MissingEnv(&'static [&'static str]),

    #[error("metadata server returned an empty project id")]
    EmptyProjectId,

    #[error("metadata server responded with status {0}")]
    Status(u16),

    #[cfg(feature = "metadata-server")]
    #[error("metadata server request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Error returned by the enrichment pipeline. Either variant means the
/// record must not be emitted.
#[derive(thiserror::Error, Debug)]
pub enum EnrichError {
    #[error("log record has no level, cannot assign a severity")]
    MissingLevel,

    #[error("trace enrichment needs the project id: {0}")]
    MetadataUnavailable(#[from] MetadataError),
}

/// Error returned by a full log call: enrichment, serialization and write.
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error(transparent)]
    Enrich(#[from] EnrichError),

    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write log line: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned when installing the global subscriber.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("resolving the project id from the metadata server needs a running tokio runtime")]
    NoRuntime,

    #[error("failed to set up the project id lookup: {0}")]
    Metadata(#[from] MetadataError),
}
