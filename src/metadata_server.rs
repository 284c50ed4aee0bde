use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::env::{env_or, DEFAULT_METADATA_HOST, GCE_METADATA_HOST_ENV};
use crate::error::MetadataError;
use crate::metadata::ProjectIdSource;

const PROJECT_ID_PATH: &str = "/computeMetadata/v1/project/project-id";

/// Client for the Google Cloud metadata server's project id endpoint.
///
/// Each [`fetch_project_id`](ProjectIdSource::fetch_project_id) call makes a
/// single request bounded by the configured timeout. Pair it with
/// [`CachedProjectId::spawn`](crate::metadata::CachedProjectId::spawn) so
/// that log calls never wait on the network.
#[derive(Clone, Debug)]
pub struct MetadataServer {
    client: Client,
    base_url: String,
}

impl MetadataServer {
    /// `host` may be a bare `host[:port]` or a full `http(s)://` URL.
    pub fn new(host: &str, timeout: Duration) -> Result<Self, MetadataError> {
        // The metadata server is link-local; never route it through a proxy.
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };
        Ok(Self { client, base_url })
    }

    /// Use `GCE_METADATA_HOST` when set, the default host otherwise.
    pub fn from_env(timeout: Duration) -> Result<Self, MetadataError> {
        Self::new(&env_or(GCE_METADATA_HOST_ENV, DEFAULT_METADATA_HOST), timeout)
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, PROJECT_ID_PATH)
    }
}

#[async_trait]
impl ProjectIdSource for MetadataServer {
    async fn fetch_project_id(&self) -> Result<String, MetadataError> {
        let resp = self
            .client
            .get(self.endpoint())
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(MetadataError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        let id = body.trim();
        if id.is_empty() {
            return Err(MetadataError::EmptyProjectId);
        }
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_http_scheme() {
        let server = MetadataServer::new("169.254.169.254", Duration::from_secs(1)).unwrap();
        assert_eq!(
            server.endpoint(),
            "http://169.254.169.254/computeMetadata/v1/project/project-id"
        );
    }

    #[test]
    fn full_url_is_kept() {
        let server = MetadataServer::new("https://meta.example/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            server.endpoint(),
            "https://meta.example/computeMetadata/v1/project/project-id"
        );
    }
}
