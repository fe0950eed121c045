//! Error handling for fetchkeep.
//!
//! Two families of errors live here. [`Error`] is raised synchronously to the
//! caller and only covers programming or configuration mistakes (a malformed
//! [`Descriptor`](crate::Descriptor), an impossible configuration) plus the
//! explicit cache maintenance operations. Everything that can go wrong while a
//! download is running is captured instead: backends report a typed
//! [`FetchFailure`], the cache collaborator reports a [`CacheError`], and the
//! manager folds both into the [`DownloadError`] stored in a FAILED
//! [`DownloadRecord`](crate::DownloadRecord).

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised to the caller of fetchkeep.
///
/// Routine network problems never show up here; they are recorded in the
/// returned [`DownloadRecord`](crate::DownloadRecord).
#[derive(Error, Debug)]
pub enum Error {
    /// The descriptor or the manager configuration is invalid.
    ///
    /// Raised before any backend or cache activity. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error from the URL parser or the expected URL format.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Error from the Reqwest library while building the HTTP client.
    #[error("Reqwest Error")]
    Reqwest {
        #[from]
        source: reqwest::Error,
    },

    /// Error from the cache collaborator during an explicit cache operation.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The backend failed during an explicit revalidation request.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchFailure),
}

impl Error {
    /// Whether the error is a caller programming error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::InvalidUrl(_))
    }
}

/// Result type alias for operations that can fail with a fetchkeep error.
pub type Result<T> = std::result::Result<T, Error>;

/// Connection-level classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The attempt exceeded its time budget.
    Timeout,
    /// The connection was reset or closed while the body was streaming.
    ConnectionReset,
    /// The host name could not be resolved.
    Dns,
    /// The connection could not be established.
    Connect,
    /// The TLS handshake failed or the certificate was rejected.
    Tls,
    /// The URL could not be used for a request.
    MalformedUrl,
    /// The server answered with something that is not valid HTTP.
    MalformedResponse,
    /// The server answered with a status that is not accepted as success.
    Status(u16),
    /// The backend itself could not run (e.g. missing curl binary).
    Unavailable,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Whether a fresh attempt may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        match self {
            FailureKind::Timeout
            | FailureKind::ConnectionReset
            | FailureKind::Dns
            | FailureKind::Connect => true,
            FailureKind::Status(code) => is_transient_status(*code),
            FailureKind::Tls
            | FailureKind::MalformedUrl
            | FailureKind::MalformedResponse
            | FailureKind::Unavailable
            | FailureKind::Other => false,
        }
    }
}

/// Same status classes `reqwest-retry` retries: request timeout, rate
/// limiting and server errors.
fn is_transient_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..=599).contains(&code)
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::ConnectionReset => write!(f, "connection reset"),
            FailureKind::Dns => write!(f, "DNS resolution failure"),
            FailureKind::Connect => write!(f, "connection failure"),
            FailureKind::Tls => write!(f, "TLS failure"),
            FailureKind::MalformedUrl => write!(f, "malformed URL"),
            FailureKind::MalformedResponse => write!(f, "malformed response"),
            FailureKind::Status(code) => write!(f, "HTTP status {}", code),
            FailureKind::Unavailable => write!(f, "backend unavailable"),
            FailureKind::Other => write!(f, "fetch failure"),
        }
    }
}

/// Typed failure reported by a [`Backend`](crate::backend::Backend), either
/// before a response arrived or while its body was streaming.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FetchFailure {
    /// Failure class.
    pub kind: FailureKind,
    /// Human readable details.
    pub message: String,
}

impl FetchFailure {
    /// Create a new failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shortcut for a timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// Whether the manager should try again.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Errors reported by the cache collaborator.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The key is not present in the store.
    #[error("Cache key not found: {0}")]
    KeyNotFound(String),

    /// The store cannot be reached or its state is unusable.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// Writing to the store failed (disk full, permission denied...).
    #[error("Cache store failed")]
    StoreFailed {
        #[from]
        source: io::Error,
    },

    /// The entry exists but cannot be read back.
    #[error("Corrupted cache entry {key}: {reason}")]
    Corrupted { key: String, reason: String },

    /// The byte stream being stored failed mid-transfer.
    #[error("Transfer interrupted while storing: {0}")]
    Interrupted(FetchFailure),

    /// An entry could not be written to the path it was exported to.
    #[error("Cannot export cache entry to {}", path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    /// Wrap a failure writing the export destination `path`.
    pub fn destination(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
        move |source| CacheError::Destination {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Error classes recorded in a FAILED download record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeout, reset, DNS: retried until the attempts ran out.
    TransientFetch,
    /// Rejected status, TLS failure, malformed response: not retried.
    PermanentFetch,
    /// The bytes could not be written to the requested destination.
    Destination,
    /// The cache collaborator failed while the destination required it.
    Cache,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TransientFetch => "TransientFetchError",
            ErrorKind::PermanentFetch => "PermanentFetchError",
            ErrorKind::Destination => "DestinationError",
            ErrorKind::Cache => "CacheError",
        };
        f.write_str(name)
    }
}

/// Failure details carried by a FAILED [`DownloadRecord`](crate::DownloadRecord).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct DownloadError {
    /// Error class.
    pub kind: ErrorKind,
    /// Human readable details.
    pub message: String,
}

impl DownloadError {
    /// Create a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&FetchFailure> for DownloadError {
    fn from(failure: &FetchFailure) -> Self {
        let kind = if failure.is_transient() {
            ErrorKind::TransientFetch
        } else {
            ErrorKind::PermanentFetch
        };
        DownloadError::new(kind, failure.to_string())
    }
}
