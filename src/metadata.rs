use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::env::PROJECT_ID_ENV_VARS;
use crate::error::MetadataError;

/// Synchronous project id lookup used by the trace enrichment stage.
///
/// The enricher calls this at most once per record and never retries it.
/// Implementations that talk to the network should answer from a cache
/// (see [`CachedProjectId`]) rather than block the logging call.
pub trait MetadataProvider: Send + Sync {
    fn project_id(&self) -> Result<String, MetadataError>;
}

impl<F> MetadataProvider for F
where
    F: Fn() -> Result<String, MetadataError> + Send + Sync,
{
    fn project_id(&self) -> Result<String, MetadataError> {
        self()
    }
}

/// One attempt at fetching the project id from wherever it lives.
#[async_trait]
pub trait ProjectIdSource: Send + Sync {
    async fn fetch_project_id(&self) -> Result<String, MetadataError>;
}

/// A project id known up front, e.g. from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticProjectId(pub String);

impl StaticProjectId {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self(project_id.into())
    }
}

impl MetadataProvider for StaticProjectId {
    fn project_id(&self) -> Result<String, MetadataError> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl ProjectIdSource for StaticProjectId {
    async fn fetch_project_id(&self) -> Result<String, MetadataError> {
        Ok(self.0.clone())
    }
}

/// Reads the project id from the first non-empty variable in `vars`.
#[derive(Debug, Clone, Copy)]
pub struct EnvProjectId {
    vars: &'static [&'static str],
}

impl EnvProjectId {
    pub fn new(vars: &'static [&'static str]) -> Self {
        Self { vars }
    }
}

impl Default for EnvProjectId {
    fn default() -> Self {
        Self::new(PROJECT_ID_ENV_VARS)
    }
}

impl MetadataProvider for EnvProjectId {
    fn project_id(&self) -> Result<String, MetadataError> {
        self.vars
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .ok_or(MetadataError::MissingEnv(self.vars))
    }
}

#[async_trait]
impl ProjectIdSource for EnvProjectId {
    async fn fetch_project_id(&self) -> Result<String, MetadataError> {
        self.project_id()
    }
}

/// Retry schedule for background project id resolution.
///
/// `max_attempts` bounds the number of fetches; `None` keeps retrying
/// until one succeeds.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            max_attempts: Some(10),
        }
    }
}

/// Process-wide project id, filled once and never invalidated.
///
/// Lookups before the value is known fail with [`MetadataError::Pending`].
/// Failed fetches are not remembered, so a later [`resolve`] or the
/// background task started by [`spawn`] can still fill the cell.
///
/// [`resolve`]: CachedProjectId::resolve
/// [`spawn`]: CachedProjectId::spawn
#[derive(Debug, Default)]
pub struct CachedProjectId {
    cell: OnceLock<String>,
}

impl CachedProjectId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project_id(project_id: impl Into<String>) -> Self {
        let cache = Self::new();
        let _ = cache.cell.set(project_id.into());
        cache
    }

    pub fn get(&self) -> Option<&str> {
        self.cell.get().map(String::as_str)
    }

    /// Store `project_id` unless a value is already cached. Returns whether
    /// the value was stored.
    pub fn set(&self, project_id: impl Into<String>) -> bool {
        self.cell.set(project_id.into()).is_ok()
    }

    /// Return the cached id, or fetch it once from `source` and cache it.
    pub async fn resolve(&self, source: &dyn ProjectIdSource) -> Result<String, MetadataError> {
        if let Some(id) = self.get() {
            return Ok(id.to_string());
        }
        let id = fetch_non_empty(source).await?;
        let _ = self.cell.set(id.clone());
        Ok(self.get().map(str::to_string).unwrap_or(id))
    }

    /// Create an empty cache and a background task that keeps fetching from
    /// `source` with exponential backoff until it succeeds or
    /// `backoff.max_attempts` is used up. The cache stays empty in that case.
    ///
    /// Only the first failure and giving up are reported on stderr.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(source: Arc<dyn ProjectIdSource>, backoff: Backoff) -> (Arc<Self>, JoinHandle<()>) {
        let cache = Arc::new(Self::new());
        let cache_bg = Arc::clone(&cache);

        let handle = tokio::spawn(async move {
            let mut delay = backoff.initial;
            let mut attempts: u32 = 0;
            while cache_bg.get().is_none() {
                attempts += 1;
                match fetch_non_empty(&*source).await {
                    Ok(id) => {
                        cache_bg.set(id);
                    }
                    Err(e) => {
                        if backoff.max_attempts.is_some_and(|max| attempts >= max) {
                            eprintln!("project id lookup gave up after {} attempts: {}", attempts, e);
                            return;
                        }
                        if attempts == 1 {
                            eprintln!("project id lookup failed, retrying in the background: {}", e);
                        }
                        sleep(delay).await;
                        delay = std::cmp::min(delay * 2, backoff.max);
                    }
                }
            }
        });

        (cache, handle)
    }
}

impl MetadataProvider for CachedProjectId {
    fn project_id(&self) -> Result<String, MetadataError> {
        self.get().map(str::to_string).ok_or(MetadataError::Pending)
    }
}

async fn fetch_non_empty(source: &dyn ProjectIdSource) -> Result<String, MetadataError> {
    let id = source.fetch_project_id().await?;
    let id = id.trim();
    if id.is_empty() {
        return Err(MetadataError::EmptyProjectId);
    }
    Ok(id.to_string())
}
