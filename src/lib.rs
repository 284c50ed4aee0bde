pub mod record;
pub mod severity;
pub mod error;
pub mod format;
pub mod trace;
pub mod metadata;

#[cfg(feature = "metadata-server")]
pub mod metadata_server;

pub mod enricher;
pub mod logger;
pub mod layer;
pub mod env;
pub mod init;

pub use enricher::{Enricher, EnricherConfig};
pub use error::{EnrichError, LogError, MetadataError};
pub use layer::{request_span, CloudLoggingLayer};
pub use logger::CloudLogger;
pub use record::LogRecord;
pub use severity::Severity;
