//! Configuration structures and defaults for the download manager.
//!
//! [`ManagerConfig`] gathers every knob of a [`DownloadManager`] in one
//! explicit structure with documented defaults. It is normally filled through
//! the [`DownloadManagerBuilder`], which validates it when building.
//!
//! # Examples
//!
//! ## Using Callbacks
//!
//! ```rust
//! use fetchkeep::manager::DownloadCallback;
//! use fetchkeep::{DownloadRecord, Status};
//!
//! let callback: DownloadCallback = Box::new(|record: &DownloadRecord| {
//!     match record.status() {
//!         Status::Success => println!("fetched {}", record.descriptor().url()),
//!         Status::CacheHit => println!("cached {}", record.descriptor().url()),
//!         Status::Failed => println!("failed {}: {:?}", record.descriptor().url(), record.error()),
//!     }
//! });
//! ```
//!
//! [`DownloadManager`]: crate::DownloadManager
//! [`DownloadManagerBuilder`]: crate::DownloadManagerBuilder

use super::retry::{Backoff, RetryPolicy};
use crate::backend::{default_user_agent, BackendConfig, BackendKind};
use crate::cache::KeyField;
use crate::download::DownloadRecord;
use crate::error::{Error, Result};
use crate::StyleOptions;

use reqwest::header::HeaderMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Callback type for download completion events.
pub type DownloadCallback = Box<dyn Fn(&DownloadRecord) + Send + Sync>;

/// Configuration structure for the download manager.
#[derive(Clone)]
pub struct ManagerConfig {
    /// Backend variant, fixed for the lifetime of the manager.
    pub backend: BackendKind,
    /// Maximum number of attempts per download, the first one included.
    pub retries: u32,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    /// Growth of the delay between attempts.
    pub backoff: Backoff,
    /// Time budget of a single attempt, body included.
    pub timeout: Duration,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Descriptor fields the cache key is derived from.
    pub cache_key_fields: BTreeSet<KeyField>,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Verify TLS certificates.
    pub verify_tls: bool,
    /// Custom HTTP headers sent with every request.
    pub headers: Option<HeaderMap>,
    /// Non-2xx statuses accepted as a success.
    pub allowed_statuses: HashSet<u16>,
    /// Cached entries older than this are ignored.
    pub max_age: Option<Duration>,
    /// Number of maximum concurrent downloads in a batch.
    pub concurrent_downloads: usize,
    /// Progress bar style options.
    pub style_options: StyleOptions,
    /// Callback for when each download completes.
    pub on_complete: Option<Arc<DownloadCallback>>,
    /// Default User-Agent.
    pub user_agent: String,
    /// Proxy URL for all traffic.
    pub proxy: Option<String>,
}

impl std::fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("backend", &self.backend)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("backoff", &self.backoff)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("cache_key_fields", &self.cache_key_fields)
            .field("follow_redirects", &self.follow_redirects)
            .field("verify_tls", &self.verify_tls)
            .field("headers", &self.headers)
            .field("allowed_statuses", &self.allowed_statuses)
            .field("max_age", &self.max_age)
            .field("concurrent_downloads", &self.concurrent_downloads)
            .field("style_options", &self.style_options)
            .field("on_complete", &self.on_complete.is_some())
            .field("user_agent", &self.user_agent)
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff: Backoff::Exponential,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            cache_key_fields: KeyField::defaults(),
            follow_redirects: true,
            verify_tls: true,
            headers: None,
            allowed_statuses: HashSet::new(),
            max_age: None,
            concurrent_downloads: 32,
            style_options: StyleOptions::default(),
            on_complete: None,
            user_agent: default_user_agent(),
            proxy: None,
        }
    }
}

impl ManagerConfig {
    /// Reject settings the manager cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 {
            return Err(Error::Validation(
                "retries must allow at least one attempt".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::Validation("the timeout must not be zero".into()));
        }
        if self.concurrent_downloads == 0 {
            return Err(Error::Validation(
                "concurrent_downloads must be at least 1".into(),
            ));
        }
        for required in [KeyField::Url, KeyField::Method] {
            if !self.cache_key_fields.contains(&required) {
                return Err(Error::Validation(format!(
                    "cache_key_fields must contain \"{}\"",
                    required
                )));
            }
        }
        if let Some(code) = self
            .allowed_statuses
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(Error::Validation(format!(
                "{} is not an HTTP status code",
                code
            )));
        }
        Ok(())
    }

    /// Attempt budget and pacing.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retries,
            delay: self.retry_delay,
            backoff: self.backoff,
        }
    }

    /// Transport settings handed to the backend.
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            connect_timeout: self.connect_timeout,
            follow_redirects: self.follow_redirects,
            verify_tls: self.verify_tls,
            headers: self.headers.clone(),
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
        }
    }
}
