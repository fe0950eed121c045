//! Builder pattern implementation for creating DownloadManager instances.
//!
//! [`DownloadManagerBuilder`] collects the [`ManagerConfig`] through consuming
//! setters, then instantiates the backend and the cache adapter once, in
//! [`DownloadManagerBuilder::build`]. Nothing is chosen per call afterwards.
//!
//! # Examples
//!
//! ## Basic Builder Usage
//!
//! ```rust
//! use fetchkeep::DownloadManagerBuilder;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), fetchkeep::Error> {
//! let manager = DownloadManagerBuilder::new()
//!     .retries(5)
//!     .retry_delay(Duration::from_millis(500))
//!     .timeout(Duration::from_secs(60))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Curl Backend with a Cache Directory
//!
//! ```rust,no_run
//! use fetchkeep::backend::BackendKind;
//! use fetchkeep::DownloadManagerBuilder;
//!
//! # fn example() -> Result<(), fetchkeep::Error> {
//! let manager = DownloadManagerBuilder::hidden()
//!     .backend(BackendKind::Curl)
//!     .cache_dir("/var/cache/fetchkeep")
//!     .build()?;
//! assert_eq!(manager.backend_name(), "curl");
//! # Ok(())
//! # }
//! ```

use super::config::ManagerConfig;
use super::manager::DownloadManager;
use super::retry::Backoff;
use crate::backend::{Backend, BackendKind};
use crate::cache::{CacheAdapter, CacheStore, FsCacheStore, KeyField};
use crate::download::DownloadRecord;
use crate::error::Result;
use crate::{ProgressBarOpts, StyleOptions};

use reqwest::header::{HeaderMap, HeaderValue, IntoHeaderName};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A builder used to create a [`DownloadManager`].
///
/// ```rust
/// # fn main() -> Result<(), fetchkeep::Error> {
/// use fetchkeep::DownloadManagerBuilder;
///
/// let manager = DownloadManagerBuilder::new().retries(5).build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DownloadManagerBuilder {
    config: ManagerConfig,
    backend: Option<Arc<dyn Backend>>,
    cache: Option<Arc<dyn CacheStore>>,
}

impl DownloadManagerBuilder {
    /// Creates a builder with the default options.
    pub fn new() -> Self {
        DownloadManagerBuilder::default()
    }

    /// Convenience function to hide the progress bars.
    pub fn hidden() -> Self {
        let mut builder = DownloadManagerBuilder::default();
        builder.config.style_options =
            StyleOptions::new(ProgressBarOpts::hidden(), ProgressBarOpts::hidden());
        builder
    }

    /// Start from an existing configuration.
    pub fn with_config(config: ManagerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Select the built-in backend variant.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Use a custom backend instead of a built-in variant.
    pub fn backend_impl(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use `store` as the cache collaborator.
    pub fn cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    /// Cache downloads in a directory, see [`FsCacheStore`].
    pub fn cache_dir(self, directory: impl Into<PathBuf>) -> Self {
        self.cache(Arc::new(FsCacheStore::new(directory)))
    }

    /// Set the maximum number of attempts per download.
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Set the base delay between attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set how the delay grows between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the time budget of a single attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the time allowed to establish a connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Select the descriptor fields the cache key is derived from.
    ///
    /// Must contain at least [`KeyField::Url`] and [`KeyField::Method`].
    pub fn cache_key_fields(mut self, fields: impl IntoIterator<Item = KeyField>) -> Self {
        self.config.cache_key_fields = fields.into_iter().collect::<BTreeSet<_>>();
        self
    }

    /// Follow redirects or not.
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Verify TLS certificates or not.
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.config.verify_tls = verify;
        self
    }

    /// Accept a non-2xx status as a success.
    pub fn allow_status(mut self, status: u16) -> Self {
        self.config.allowed_statuses.insert(status);
        self
    }

    /// Ignore cached entries older than `max_age`.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.config.max_age = Some(max_age);
        self
    }

    /// Set the number of concurrent downloads.
    pub fn concurrent_downloads(mut self, concurrent_downloads: usize) -> Self {
        self.config.concurrent_downloads = concurrent_downloads;
        self
    }

    /// Set the progress bar style options.
    pub fn style_options(mut self, style_options: StyleOptions) -> Self {
        self.config.style_options = style_options;
        self
    }

    /// Set the default User-Agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Send all traffic through a proxy.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy.into());
        self
    }

    /// Set callback for when each download completes.
    ///
    /// The callback runs once per `download` call, cache hits and coalesced
    /// calls included.
    ///
    /// # Example
    ///
    /// ```rust
    /// use fetchkeep::{DownloadManagerBuilder, Status};
    ///
    /// let manager = DownloadManagerBuilder::new()
    ///     .on_complete(|record| {
    ///         if record.status() == Status::Failed {
    ///             eprintln!("[Failed] {}", record.descriptor().url());
    ///         }
    ///     })
    ///     .build();
    /// ```
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DownloadRecord) + Send + Sync + 'static,
    {
        self.config.on_complete = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Helper method to get or create a new HeaderMap.
    fn new_header(&self) -> HeaderMap {
        match self.config.headers {
            Some(ref h) => h.to_owned(),
            _ => HeaderMap::new(),
        }
    }

    /// Add default http headers.
    ///
    /// You can call `.headers()` multiple times and all `HeaderMap` will be
    /// merged into a single one. Descriptor headers take precedence.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut new = self.new_header();
        new.extend(headers);

        self.config.headers = Some(new);
        self
    }

    /// Add a default http header.
    ///
    /// ```
    /// use reqwest::header::{self, HeaderValue};
    /// use fetchkeep::DownloadManagerBuilder;
    ///
    /// let auth = HeaderValue::from_static("Basic aGk6MTIzNDU2Cg==");
    ///
    /// let manager = DownloadManagerBuilder::new()
    ///     .header(header::AUTHORIZATION, auth)
    ///     .build();
    /// ```
    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        let mut new = self.new_header();

        new.insert(name, value);

        self.config.headers = Some(new);
        self
    }

    /// Create the [`DownloadManager`] with the specified options.
    ///
    /// Fails with a validation error for settings the manager cannot honor,
    /// or when the HTTP client cannot be built.
    pub fn build(self) -> Result<DownloadManager> {
        self.config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => self.config.backend.create(&self.config.backend_config())?,
        };
        let cache = self
            .cache
            .map(|store| CacheAdapter::new(store, self.config.cache_key_fields.clone()));

        Ok(DownloadManager::new(self.config, backend, cache))
    }
}
