//! Template fetchers for `#%load`
//!
//! All fetchers receive an already resolved absolute URL.

use crate::error::FetchError;
use async_trait::async_trait;
use moka::future::Cache;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of template text
#[async_trait]
pub trait TemplateFetcher: Send + Sync + std::fmt::Debug {
    /// Fetch the text behind `url`
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl<T: TemplateFetcher + ?Sized> TemplateFetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        (**self).fetch(url).await
    }
}

/// Fetches templates over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpTemplateFetcher {
    client: reqwest::Client,
}

impl HttpTemplateFetcher {
    /// Create new fetcher with a request timeout
    ///
    /// # Errors
    /// Returns [`FetchError::Request`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::Request {
                url: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Create from an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TemplateFetcher for HttpTemplateFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!("Fetching template {}", url);
        let request_err = |err: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(request_err)
    }
}

/// Serves templates from a local directory mounted at the host origin
///
/// `https://host/static/t.py` maps to `<root>/static/t.py`.
#[derive(Debug, Clone)]
pub struct FileTemplateFetcher {
    root: PathBuf,
    origin: String,
}

impl FileTemplateFetcher {
    /// Create new fetcher
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            origin: origin.into().trim_end_matches('/').to_string(),
        }
    }

    fn local_path(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(&self.origin)?.strip_prefix('/')?;
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let relative = Path::new(rest);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl TemplateFetcher for FileTemplateFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let path = self
            .local_path(url)
            .ok_or_else(|| FetchError::Unsupported(url.to_string()))?;
        tracing::debug!("Reading template {}", path.display());
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| FetchError::Io {
                path: path.display().to_string(),
                reason: err.to_string(),
            })
    }
}

/// Caching wrapper; concurrent fetches of one URL share a single request
#[derive(Debug, Clone)]
pub struct CachedFetcher<F> {
    inner: Arc<F>,
    cache: Cache<String, String>,
    misses: Arc<AtomicU64>,
}

impl<F: TemplateFetcher + 'static> CachedFetcher<F> {
    /// Create new cache with max entry count
    #[must_use]
    pub fn new(inner: F, max_capacity: u64) -> Self {
        Self {
            inner: Arc::new(inner),
            cache: Cache::new(max_capacity),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create cache with time-based expiration
    #[must_use]
    pub fn with_ttl(inner: F, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of fetches that reached the inner fetcher
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop a cached entry
    pub async fn invalidate(&self, url: &str) {
        self.cache.invalidate(url).await;
    }
}

#[async_trait]
impl<F: TemplateFetcher + 'static> TemplateFetcher for CachedFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let inner = Arc::clone(&self.inner);
        let misses = Arc::clone(&self.misses);
        let owned = url.to_string();
        self.cache
            .try_get_with(owned.clone(), async move {
                misses.fetch_add(1, Ordering::Relaxed);
                inner.fetch(&owned).await
            })
            .await
            .map_err(|err| (*err).clone())
    }
}
