//! Network backends.
//!
//! A [`Backend`] performs exactly one network transfer per call and hands back
//! the status, the headers and a lazily streamed body. Backends never retry;
//! the [`DownloadManager`](crate::DownloadManager) owns the retry policy.
//! Connection-level problems are reported as a typed
//! [`FetchFailure`](crate::error::FetchFailure), either from `fetch` itself or
//! as an error item of the body stream.
//!
//! Two variants ship with the crate and behave the same for the same request:
//!
//! - [`ReqwestBackend`] - in-process HTTP client built on `reqwest`
//! - [`CurlBackend`] - drives the system `curl` binary
//!
//! The variant is picked once, when the manager is built, through
//! [`BackendKind`]. Any other implementation can be injected with
//! [`DownloadManagerBuilder::backend_impl`](crate::DownloadManagerBuilder::backend_impl).
//!
//! # Examples
//!
//! ```rust,no_run
//! use fetchkeep::backend::{Backend, BackendConfig, ReqwestBackend};
//! use fetchkeep::Descriptor;
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = ReqwestBackend::new(&BackendConfig::default())?;
//! let mut response = backend
//!     .fetch(&Descriptor::new("https://example.com/"), Duration::from_secs(30))
//!     .await?;
//! println!("status {}", response.status);
//! while let Some(chunk) = response.body.next().await {
//!     println!("{} bytes", chunk?.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod curl;
pub mod http;

pub use curl::CurlBackend;
pub use http::{create_http_client, ReqwestBackend};

use crate::download::Descriptor;
use crate::error::{FetchFailure, Result};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Lazy, single-pass response body.
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, FetchFailure>>;

/// Maximum number of redirects a backend follows.
pub const MAX_REDIRECTS: usize = 10;

/// Raw outcome of one network attempt that produced a response.
pub struct BackendResponse {
    /// HTTP status of the final response.
    pub status: StatusCode,
    /// Headers of the final response.
    pub headers: HeaderMap,
    /// Body, streamed on demand. Dropping it closes the connection.
    pub body: BodyStream,
}

impl fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Performs network transfers.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Identifier recorded in [`DownloadRecord::backend_used`](crate::DownloadRecord::backend_used).
    fn name(&self) -> &str;

    /// Send the request described by `descriptor`.
    ///
    /// `timeout` bounds the whole transfer, body included. Must not retry.
    async fn fetch(
        &self,
        descriptor: &Descriptor,
        timeout: Duration,
    ) -> std::result::Result<BackendResponse, FetchFailure>;
}

/// Built-in backend variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process HTTP client.
    #[default]
    Reqwest,
    /// System `curl` binary.
    Curl,
}

impl BackendKind {
    /// Instantiate the backend.
    pub fn create(&self, config: &BackendConfig) -> Result<Arc<dyn Backend>> {
        Ok(match self {
            BackendKind::Reqwest => Arc::new(ReqwestBackend::new(config)?),
            BackendKind::Curl => Arc::new(CurlBackend::new(config.clone())),
        })
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Reqwest => write!(f, "reqwest"),
            BackendKind::Curl => write!(f, "curl"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reqwest" | "requests" | "http" => Ok(BackendKind::Reqwest),
            "curl" | "pycurl" => Ok(BackendKind::Curl),
            other => Err(crate::error::Error::Validation(format!(
                "unknown backend \"{}\"",
                other
            ))),
        }
    }
}

/// Transport settings shared by every backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Follow up to [`MAX_REDIRECTS`] redirects.
    pub follow_redirects: bool,
    /// Verify TLS certificates.
    pub verify_tls: bool,
    /// Headers added to every request. Descriptor headers take precedence.
    pub headers: Option<HeaderMap>,
    /// Default User-Agent.
    pub user_agent: String,
    /// Proxy URL for all traffic.
    pub proxy: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            verify_tls: true,
            headers: None,
            user_agent: default_user_agent(),
            proxy: None,
        }
    }
}

/// `fetchkeep/<version>`.
pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
