//! Core download manager.
//!
//! [`DownloadManager`] sequences the other components for every call:
//! validation, coalescing on the cache key, cache lookup, backend attempts
//! under the retry policy, routing of the body and store-on-miss. Only
//! validation errors are raised; everything else ends up in the returned
//! [`DownloadRecord`].
//!
//! # Examples
//!
//! ## Buffer Download
//!
//! ```rust,no_run
//! use fetchkeep::{Descriptor, Destination, DownloadManagerBuilder};
//!
//! # async fn example() -> Result<(), fetchkeep::Error> {
//! let manager = DownloadManagerBuilder::hidden().build()?;
//! let record = manager
//!     .download(Descriptor::new("https://example.com/a.txt"), Some(Destination::Buffer))
//!     .await?;
//!
//! if let Some(bytes) = record.artifact().and_then(|artifact| artifact.bytes()) {
//!     println!("{} bytes, sha256 {:?}", bytes.len(), record.content_hash());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Batch Download through a Cache
//!
//! ```rust,no_run
//! use fetchkeep::{Descriptor, DownloadManagerBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DownloadManagerBuilder::new()
//!     .cache_dir("/var/cache/fetchkeep")
//!     .concurrent_downloads(8)
//!     .build()?;
//! let descriptors = vec![
//!     Descriptor::try_from("https://example.com/file1.zip")?,
//!     Descriptor::try_from("https://example.com/file2.pdf")?,
//! ];
//!
//! for record in manager.download_many(&descriptors).await {
//!     let record = record?;
//!     println!("{} {}", record.descriptor().url(), record.status());
//! }
//! # Ok(())
//! # }
//! ```

use super::config::ManagerConfig;
use super::inflight::{InFlight, Joined};
use super::retry::RetryPolicy;
use crate::backend::Backend;
use crate::cache::adapter::derive_key;
use crate::cache::{CacheAdapter, CacheKey, CacheMetadata, StoreBody};
use crate::destination::{CacheTarget, Destination, RouteError, Routed, Router};
use crate::download::{record, Artifact, Descriptor, DownloadRecord, HashingStream, Outcome, Timestamps};
use crate::error::{CacheError, DownloadError, Error, ErrorKind, FailureKind, FetchFailure, Result};
use crate::freshness::{check_freshness, Freshness, FreshnessMethod};
use crate::progress::ProgressDisplay;
use crate::utils::headers::{content_length, filename_from_headers, header_map_to_btree};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use reqwest::{Method, StatusCode};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Represents the download controller.
///
/// A manager is created via its builder and is cheap to clone; clones share
/// the backend, the cache adapter and the coalescing registry.
///
/// ```rust
/// # fn main() -> Result<(), fetchkeep::Error> {
/// use fetchkeep::DownloadManagerBuilder;
///
/// let manager = DownloadManagerBuilder::new().build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ManagerConfig,
    retry: RetryPolicy,
    backend: Arc<dyn Backend>,
    cache: Option<CacheAdapter>,
    router: Router,
    inflight: InFlight,
}

impl fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadManager")
            .field("config", &self.inner.config)
            .field("backend", &self.inner.backend.name())
            .field("cache", &self.inner.cache)
            .finish()
    }
}

/// A successful attempt.
struct Fetched {
    status_code: u16,
    headers: BTreeMap<String, String>,
    metadata: Option<CacheMetadata>,
    routed: Routed,
}

/// A failed attempt.
struct Failed {
    error: DownloadError,
    transient: bool,
    status_code: Option<u16>,
    headers: BTreeMap<String, String>,
}

impl Failed {
    fn fetch(failure: FetchFailure) -> Self {
        Self {
            error: DownloadError::from(&failure),
            transient: failure.is_transient(),
            status_code: None,
            headers: BTreeMap::new(),
        }
    }

    fn route(error: RouteError) -> Self {
        let kind = match error {
            RouteError::Body(failure) => return Self::fetch(failure),
            RouteError::Destination(_) => ErrorKind::Destination,
            RouteError::Cache(_) => ErrorKind::Cache,
        };
        Self {
            error: DownloadError::new(kind, error.to_string()),
            transient: false,
            status_code: None,
            headers: BTreeMap::new(),
        }
    }

    fn with_response(mut self, status_code: u16, headers: BTreeMap<String, String>) -> Self {
        self.status_code = Some(status_code);
        self.headers = headers;
        self
    }
}

impl DownloadManager {
    pub(crate) fn new(
        config: ManagerConfig,
        backend: Arc<dyn Backend>,
        cache: Option<CacheAdapter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                retry: config.retry_policy(),
                router: Router::new(cache.clone()),
                inflight: InFlight::default(),
                config,
                backend,
                cache,
            }),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Identifier of the backend, as recorded in [`DownloadRecord::backend_used`].
    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Gets the cache adapter, if a cache is configured.
    pub fn cache(&self) -> Option<&CacheAdapter> {
        self.inner.cache.as_ref()
    }

    /// Key a descriptor is cached and coalesced under.
    pub fn cache_key(&self, descriptor: &Descriptor) -> CacheKey {
        self.inner.cache_key(descriptor)
    }

    /// Download one resource.
    ///
    /// Without a `destination`, the bytes go to the cache when one is
    /// configured and to a buffer otherwise. A malformed descriptor or an
    /// impossible destination is rejected before any backend or cache
    /// activity; any other problem is reported through a FAILED record.
    pub async fn download(
        &self,
        descriptor: impl Into<Arc<Descriptor>>,
        destination: Option<Destination>,
    ) -> Result<DownloadRecord> {
        let progress = ProgressDisplay::new(self.inner.config.style_options.clone(), 1, true);
        self.run(descriptor.into(), destination, &progress).await
    }

    /// Download every descriptor to its default destination.
    ///
    /// Runs up to `concurrent_downloads` downloads at once. The results come
    /// back in completion order.
    pub async fn download_many(&self, descriptors: &[Descriptor]) -> Vec<Result<DownloadRecord>> {
        // Prepare the progress display.
        let progress_display = ProgressDisplay::new(
            self.inner.config.style_options.clone(),
            descriptors.len(),
            false,
        );

        let records = stream::iter(descriptors)
            .map(|d| self.fetch_counted(d, &progress_display))
            .buffer_unordered(self.inner.config.concurrent_downloads)
            .collect::<Vec<_>>()
            .await;

        progress_display.finish();
        records
    }

    async fn fetch_counted(
        &self,
        descriptor: &Descriptor,
        progress_display: &ProgressDisplay,
    ) -> Result<DownloadRecord> {
        let record = self
            .run(Arc::new(descriptor.clone()), None, progress_display)
            .await;
        progress_display.increment_main();
        record
    }

    /// Remove the cached entry of a descriptor.
    ///
    /// Returns whether an entry existed. The next download refetches.
    pub async fn invalidate(&self, descriptor: &Descriptor) -> Result<bool> {
        descriptor.validate()?;
        let cache = self.require_cache()?;
        let key = cache.cache_key(descriptor);
        let removed = cache.remove(&key).await?;
        debug!(url = descriptor.url(), key = %key, removed, "Invalidated cache entry");
        Ok(removed)
    }

    /// Check whether the cached entry of a descriptor is still current.
    ///
    /// Sends a `HEAD` request through the configured backend and compares
    /// its headers with the stored metadata. The body is never downloaded.
    pub async fn revalidate(
        &self,
        descriptor: &Descriptor,
        method: FreshnessMethod,
    ) -> Result<Freshness> {
        descriptor.validate()?;
        let cache = self.require_cache()?;
        let key = cache.cache_key(descriptor);
        let entry = cache.fetch_cached(&key).await?;

        let head = Descriptor::new(descriptor.url())
            .with_method(Method::HEAD)
            .with_headers(descriptor.headers().clone())
            .with_query(descriptor.query().iter().cloned());
        let response = self
            .inner
            .backend
            .fetch(&head, self.inner.config.timeout)
            .await?;
        let status = response.status;
        let headers = response.headers;
        drop(response.body);

        if !self.inner.accepts(status) {
            return Ok(Freshness {
                current: false,
                reason: format!("HEAD request answered {}", status),
            });
        }

        let freshness = check_freshness(&headers, &entry.metadata, method);
        info!(
            url = descriptor.url(),
            current = freshness.current,
            reason = %freshness.reason,
            "Revalidated cache entry"
        );
        Ok(freshness)
    }

    fn require_cache(&self) -> Result<&CacheAdapter> {
        self.inner
            .cache
            .as_ref()
            .ok_or_else(|| Error::Validation("no cache is configured".into()))
    }

    async fn run(
        &self,
        descriptor: Arc<Descriptor>,
        destination: Option<Destination>,
        progress: &ProgressDisplay,
    ) -> Result<DownloadRecord> {
        descriptor.validate()?;
        let cache_configured = self.inner.cache.is_some();
        let destination = Destination::resolve(destination, cache_configured);
        destination.validate(cache_configured)?;
        let key = self.inner.cache_key(&descriptor);

        let record = loop {
            let joined = self
                .inner
                .inflight
                .join(&key, &destination, |id| {
                    let inner = Arc::clone(&self.inner);
                    let descriptor = Arc::clone(&descriptor);
                    let destination = destination.clone();
                    let key = key.clone();
                    let progress = progress.clone();
                    async move {
                        let record = inner
                            .perform(descriptor, &destination, &key, &progress)
                            .await;
                        inner.inflight.finish(&key, id).await;
                        record
                    }
                    .boxed()
                })
                .await;

            match joined {
                Joined::Leader(download) => break download.await,
                Joined::Follower {
                    download,
                    same_destination: true,
                } => {
                    debug!(key = %key, "Joining the download in flight");
                    break download.await;
                }
                Joined::Follower { download, .. } => {
                    // Another destination: let the running download fill the
                    // cache, then go again.
                    debug!(key = %key, "Waiting for the download in flight");
                    download.await;
                }
            }
        };

        if let Some(ref callback) = self.inner.config.on_complete {
            callback(&record);
        }
        Ok(record)
    }
}

impl Inner {
    fn cache_key(&self, descriptor: &Descriptor) -> CacheKey {
        match &self.cache {
            Some(cache) => cache.cache_key(descriptor),
            None => derive_key(descriptor, &self.config.cache_key_fields),
        }
    }

    fn accepts(&self, status: StatusCode) -> bool {
        status.is_success() || self.config.allowed_statuses.contains(&status.as_u16())
    }

    async fn perform(
        &self,
        descriptor: Arc<Descriptor>,
        destination: &Destination,
        key: &CacheKey,
        progress: &ProgressDisplay,
    ) -> DownloadRecord {
        let started_at = Utc::now();

        if let Some(cache) = &self.cache {
            match self.lookup(cache, key, destination).await {
                Ok(Some((metadata, artifact))) => {
                    info!(url = descriptor.url(), key = %key, "Cache hit");
                    return record(
                        descriptor,
                        Outcome::CacheHit {
                            cache_key: key.clone(),
                            metadata,
                            artifact,
                        },
                        Timestamps::finished_now(started_at),
                        None,
                    );
                }
                Ok(None) => debug!(key = %key, "Cache miss"),
                Err(e @ CacheError::Destination { .. }) => {
                    // The entry is intact, only the destination failed.
                    warn!(key = %key, error = %e, "Cannot deliver cached entry");
                    return record(
                        descriptor,
                        Outcome::Failed {
                            cache_key: Some(key.clone()),
                            status_code: None,
                            headers: BTreeMap::new(),
                            error: DownloadError::new(ErrorKind::Destination, e.to_string()),
                            attempts: 0,
                        },
                        Timestamps::finished_now(started_at),
                        None,
                    );
                }
                Err(e) => warn!(key = %key, error = %e, "Cache lookup failed, treating as a miss"),
            }
        }

        let cache_key = self.cache.as_ref().map(|_| key.clone());
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                url = descriptor.url(),
                attempt,
                backend = self.backend.name(),
                "Fetching"
            );

            let result = match timeout(
                self.config.timeout,
                self.attempt(&descriptor, destination, key, progress),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Failed::fetch(FetchFailure::timeout(format!(
                    "attempt exceeded {:?}",
                    self.config.timeout
                )))),
            };

            match result {
                Ok(fetched) => {
                    self.store_on_miss(key, &fetched).await;
                    info!(
                        url = descriptor.url(),
                        destination = %destination,
                        size = fetched.routed.digest.size,
                        attempts = attempt,
                        "Downloaded"
                    );
                    return record(
                        descriptor,
                        Outcome::Fetched {
                            cache_key,
                            status_code: fetched.status_code,
                            headers: fetched.headers,
                            digest: fetched.routed.digest,
                            artifact: fetched.routed.artifact,
                            attempts: attempt,
                        },
                        Timestamps::finished_now(started_at),
                        Some(self.backend.name()),
                    );
                }
                Err(failed) if failed.transient && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        url = descriptor.url(),
                        attempt,
                        error = %failed.error,
                        ?delay,
                        "Transient failure, retrying"
                    );
                    sleep(delay).await;
                }
                Err(failed) => {
                    warn!(
                        url = descriptor.url(),
                        attempts = attempt,
                        error = %failed.error,
                        "Download failed"
                    );
                    return record(
                        descriptor,
                        Outcome::Failed {
                            cache_key,
                            status_code: failed.status_code,
                            headers: failed.headers,
                            error: failed.error,
                            attempts: attempt,
                        },
                        Timestamps::finished_now(started_at),
                        Some(self.backend.name()),
                    );
                }
            }
        }
    }

    /// Cached artifact delivered to `destination`, `None` on a miss.
    async fn lookup(
        &self,
        cache: &CacheAdapter,
        key: &CacheKey,
        destination: &Destination,
    ) -> std::result::Result<Option<(CacheMetadata, Artifact)>, CacheError> {
        if !cache.has(key).await? {
            return Ok(None);
        }
        let entry = match cache.fetch_cached(key).await {
            Ok(entry) => entry,
            Err(CacheError::KeyNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if let Some(max_age) = self.config.max_age {
            if entry.metadata.is_older_than(max_age) {
                debug!(key = %key, stored_at = %entry.metadata.stored_at, "Cached entry too old");
                return Ok(None);
            }
        }

        let artifact = match destination {
            Destination::Buffer => Artifact::Buffer(cache.read(key).await?),
            Destination::Path(path) => {
                cache.export(key, path).await?;
                Artifact::Path(path.clone())
            }
            Destination::Cache => Artifact::Cache(entry.reference),
        };
        Ok(Some((entry.metadata, artifact)))
    }

    /// One backend invocation, body routed to its destination.
    async fn attempt(
        &self,
        descriptor: &Descriptor,
        destination: &Destination,
        key: &CacheKey,
        progress: &ProgressDisplay,
    ) -> std::result::Result<Fetched, Failed> {
        let response = self
            .backend
            .fetch(descriptor, self.config.timeout)
            .await
            .map_err(Failed::fetch)?;
        let status_code = response.status.as_u16();
        let headers = header_map_to_btree(&response.headers);

        if !self.accepts(response.status) {
            // The body is dropped unread, which closes the connection.
            let failure = FetchFailure::new(
                FailureKind::Status(status_code),
                format!("the server answered {}", response.status),
            );
            return Err(Failed::fetch(failure).with_response(status_code, headers));
        }

        let metadata = self
            .cache
            .as_ref()
            .map(|_| self.metadata(descriptor, status_code, &headers));
        let cache_target = match (destination, &metadata) {
            (Destination::Cache, Some(metadata)) => Some(CacheTarget {
                key,
                metadata: metadata.clone(),
            }),
            _ => None,
        };

        let pb = progress.create_child_progress(content_length(&response.headers));
        let body = HashingStream::new(response.body).with_progress(pb.clone());
        match self.router.route(body, destination, cache_target).await {
            Ok(routed) => {
                progress.finish_child(pb);
                Ok(Fetched {
                    status_code,
                    headers,
                    metadata,
                    routed,
                })
            }
            Err(e) => {
                progress.abandon_child(pb);
                Err(Failed::route(e).with_response(status_code, headers))
            }
        }
    }

    fn metadata(
        &self,
        descriptor: &Descriptor,
        status: u16,
        headers: &BTreeMap<String, String>,
    ) -> CacheMetadata {
        CacheMetadata {
            url: descriptor
                .request_url()
                .map(|url| url.to_string())
                .unwrap_or_else(|_| descriptor.url().to_string()),
            method: descriptor.method().to_string(),
            status,
            headers: headers.clone(),
            content_hash: String::new(),
            size: 0,
            stored_at: Utc::now(),
            etag: headers.get("etag").cloned(),
            last_modified: headers.get("last-modified").cloned(),
            content_md5: headers.get("content-md5").cloned(),
            filename: filename_from_headers(headers).or_else(|| descriptor.url_filename()),
            backend: Some(self.backend.name().to_string()),
        }
    }

    /// Copy a fetched artifact into the cache. Failures only degrade caching.
    async fn store_on_miss(&self, key: &CacheKey, fetched: &Fetched) {
        let (Some(cache), Some(metadata)) = (&self.cache, &fetched.metadata) else {
            return;
        };
        let body = match &fetched.routed.artifact {
            Artifact::Buffer(bytes) => StoreBody::Bytes(bytes.clone()),
            Artifact::Path(path) => StoreBody::File(path),
            Artifact::Cache(_) => return,
        };

        let metadata = CacheMetadata {
            content_hash: fetched.routed.digest.sha256.clone(),
            size: fetched.routed.digest.size,
            ..metadata.clone()
        };
        if let Err(e) = cache.store(key, body, metadata).await {
            warn!(key = %key, error = %e, "Could not store the download in the cache");
        }
    }
}
