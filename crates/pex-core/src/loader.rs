//! Manifest and fragment retrieval
//!
//! Every fetch goes through the host [`ContentSource`] under the configured
//! time bound. Manifest bodies are cached by path for the lifetime of the
//! loader, so several declarations pointing at one sheet cost one fetch.

use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::page::ContentSource;
use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const MANIFEST_CACHE_CAPACITY: u64 = 64;

/// Cache of fetched manifest bodies keyed by path
#[derive(Debug, Clone)]
pub struct ManifestCache {
    inner: Cache<String, Arc<String>>,
}

impl ManifestCache {
    /// Create cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Cached body, or the result of `fetch` stored under `path`
    ///
    /// Concurrent callers for one path share a single `fetch`.
    ///
    /// # Errors
    /// The error of `fetch`; failures are not cached
    pub async fn get_or_fetch<F>(&self, path: &str, fetch: F) -> Result<Arc<String>, FetchError>
    where
        F: Future<Output = Result<String, FetchError>>,
    {
        self.inner
            .try_get_with(path.to_string(), async move { fetch.await.map(Arc::new) })
            .await
            .map_err(|err| (*err).clone())
    }
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::new(MANIFEST_CACHE_CAPACITY)
    }
}

/// Bounded fetches of manifests and variant markup
#[derive(Clone)]
pub struct ContentLoader {
    source: Arc<dyn ContentSource>,
    timeout: Duration,
    plain_suffix: String,
    manifests: ManifestCache,
}

impl std::fmt::Debug for ContentLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentLoader")
            .field("timeout", &self.timeout)
            .field("plain_suffix", &self.plain_suffix)
            .finish_non_exhaustive()
    }
}

impl ContentLoader {
    /// Create loader over a content source
    #[must_use]
    pub fn new(source: Arc<dyn ContentSource>, config: &EngineConfig) -> Self {
        Self {
            source,
            timeout: config.fetch_timeout(),
            plain_suffix: config.plain_suffix.clone(),
            manifests: ManifestCache::default(),
        }
    }

    async fn fetch_bounded(&self, path: &str) -> Result<crate::page::Fetched, FetchError> {
        match tokio::time::timeout(self.timeout, self.source.fetch(path)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                path: path.to_string(),
                millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Fetch a manifest referenced from `page_url`
    ///
    /// # Errors
    /// `FetchError` when the reference is off-site, the fetch fails or times out
    pub async fn manifest(&self, reference: &str, page_url: &Url) -> Result<Arc<String>, FetchError> {
        let resolved = page_url
            .join(reference.trim())
            .map_err(|e| FetchError::Transport(format!("{reference}: {e}")))?;
        if resolved.origin() != page_url.origin() {
            return Err(FetchError::Transport(format!(
                "{reference}: manifest on another origin"
            )));
        }
        let path = match resolved.query() {
            Some(query) => format!("{}?{query}", resolved.path()),
            None => resolved.path().to_string(),
        };

        self.manifests
            .get_or_fetch(&path, async {
                tracing::debug!(manifest = %path, "fetching manifest");
                self.fetch_bounded(&path).await.map(|fetched| fetched.body)
            })
            .await
    }

    /// Fetch the plain markup published at a variant path
    ///
    /// # Errors
    /// `FetchError` on failure, timeout, or when the path redirects
    pub async fn variant_markup(&self, path: &str) -> Result<String, FetchError> {
        let target = format!("{path}{}", self.plain_suffix);
        let fetched = self.fetch_bounded(&target).await?;
        if fetched.redirected {
            return Err(FetchError::Redirected(path.to_string()));
        }
        Ok(fetched.body)
    }
}
