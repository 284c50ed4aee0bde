//! Environment variable names read by [`LoggingConfig::from_env`].
//!
//! These are purely helpers; the enricher and layer themselves never touch
//! the environment.
//!
//! [`LoggingConfig::from_env`]: crate::init::LoggingConfig::from_env

/// Explicit project id; skips any metadata lookup when set.
pub const CLOUD_LOGGING_PROJECT_ID_ENV: &str = "CLOUD_LOGGING_PROJECT_ID";

/// Project id variables set by Google Cloud runtimes and tooling, in lookup order.
pub const PROJECT_ID_ENV_VARS: &[&str] = &["GOOGLE_CLOUD_PROJECT", "GCP_PROJECT"];

/// `true` to add `spanId` and `trace_sampled` next to the trace field.
pub const CLOUD_LOGGING_SPAN_CORRELATION_ENV: &str = "CLOUD_LOGGING_SPAN_CORRELATION";

/// `false` to leave out `logging.googleapis.com/sourceLocation`.
pub const CLOUD_LOGGING_SOURCE_LOCATION_ENV: &str = "CLOUD_LOGGING_SOURCE_LOCATION";

/// `true` to also print human-readable events to stderr.
pub const CLOUD_LOGGING_CONSOLE_ENV: &str = "CLOUD_LOGGING_CONSOLE";

/// Host of the metadata server on GCE, Cloud Run and GKE.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

/// Metadata server host override, same meaning as in the Google client libraries.
pub const GCE_METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

/// Per-request timeout for the metadata server, in milliseconds.
pub const CLOUD_LOGGING_METADATA_TIMEOUT_MS_ENV: &str = "CLOUD_LOGGING_METADATA_TIMEOUT_MS";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a boolean flag (`1/true/yes/on`, `0/false/no/off`), falling back to
/// `default` when unset or unrecognized.
pub fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|value| parse_flag(&value))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
