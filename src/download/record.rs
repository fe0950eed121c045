//! Download records.
//!
//! A [`DownloadRecord`] is the provenance of one `download` call: what was
//! asked, how it ended, when, which backend served it and the SHA-256 of the
//! bytes that were delivered. Records are built exclusively by the
//! [`recorder`](super::recorder) so the cache-hit, success and failure paths
//! stay uniform.
//!
//! # Examples
//!
//! ```rust,no_run
//! use fetchkeep::{Descriptor, Destination, DownloadManagerBuilder, Status};
//!
//! # async fn example() -> Result<(), fetchkeep::Error> {
//! let manager = DownloadManagerBuilder::hidden().build()?;
//! let record = manager
//!     .download(Descriptor::new("https://example.com/a.txt"), Some(Destination::Buffer))
//!     .await?;
//!
//! match record.status() {
//!     Status::Success | Status::CacheHit => {
//!         println!("sha256 {}", record.content_hash().unwrap_or_default());
//!     }
//!     Status::Failed => println!("failed: {}", record.error().unwrap()),
//! }
//! # Ok(())
//! # }
//! ```

use super::descriptor::Descriptor;
use crate::cache::{CacheKey, CacheRef};
use crate::error::DownloadError;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The bytes were fetched from the network and delivered.
    Success,
    /// The request was served from the cache without network activity.
    CacheHit,
    /// The download failed; see [`DownloadRecord::error`].
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "SUCCESS"),
            Status::CacheHit => write!(f, "CACHE_HIT"),
            Status::Failed => write!(f, "FAILED"),
        }
    }
}

/// Where the delivered bytes can be accessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// In-memory bytes.
    Buffer(Bytes),
    /// Absolute path of the written file.
    Path(PathBuf),
    /// Stable reference into the cache store.
    Cache(CacheRef),
}

impl Artifact {
    /// The bytes of a buffer artifact.
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Artifact::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// A readable handle over a buffer artifact.
    pub fn reader(&self) -> Option<Cursor<Bytes>> {
        self.bytes().map(|bytes| Cursor::new(bytes.clone()))
    }

    /// The path of a file artifact.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Artifact::Path(path) => Some(path),
            _ => None,
        }
    }

    /// The reference of a cache artifact.
    pub fn cache_ref(&self) -> Option<&CacheRef> {
        match self {
            Artifact::Cache(reference) => Some(reference),
            _ => None,
        }
    }
}

/// Metadata describing the outcome of one `download` call.
///
/// Invariants: `finished_at >= started_at`; `content_hash` is present iff the
/// status is [`Status::Success`] or [`Status::CacheHit`]; `error` is present
/// iff the status is [`Status::Failed`]; `backend_used` is absent on a cache
/// hit.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub(super) descriptor: Arc<Descriptor>,
    pub(super) status: Status,
    pub(super) started_at: DateTime<Utc>,
    pub(super) finished_at: DateTime<Utc>,
    pub(super) content_hash: Option<String>,
    pub(super) backend_used: Option<String>,
    pub(super) error: Option<DownloadError>,
    pub(super) status_code: Option<u16>,
    pub(super) response_headers: BTreeMap<String, String>,
    pub(super) size: u64,
    pub(super) filename: Option<String>,
    pub(super) cache_key: Option<CacheKey>,
    pub(super) artifact: Option<Artifact>,
    pub(super) attempts: u32,
}

impl DownloadRecord {
    /// The originating descriptor.
    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// The outcome.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether bytes were delivered, from the network or the cache.
    pub fn is_ok(&self) -> bool {
        self.status != Status::Failed
    }

    /// When the download started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the download finished.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Time spent between start and finish.
    pub fn elapsed(&self) -> Duration {
        self.finished_at - self.started_at
    }

    /// Hex SHA-256 of the delivered bytes.
    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    /// Identifier of the backend that served the request.
    pub fn backend_used(&self) -> Option<&str> {
        self.backend_used.as_deref()
    }

    /// Failure details.
    pub fn error(&self) -> Option<&DownloadError> {
        self.error.as_ref()
    }

    /// HTTP status of the final attempt (or of the cached response).
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Response headers, lowercase names.
    pub fn response_headers(&self) -> &BTreeMap<String, String> {
        &self.response_headers
    }

    /// Size of the delivered content in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// File name announced by the server or derived from the URL.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Cache key of the descriptor, when a cache is configured.
    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.cache_key.as_ref()
    }

    /// Where the bytes landed.
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Number of backend invocations made for this record.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Success.to_string(), "SUCCESS");
        assert_eq!(Status::CacheHit.to_string(), "CACHE_HIT");
        assert_eq!(Status::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_artifact_accessors() {
        let buffer = Artifact::Buffer(Bytes::from_static(b"hello"));
        assert_eq!(buffer.bytes().unwrap().as_ref(), b"hello");
        assert!(buffer.path().is_none());

        let mut reader = buffer.reader().unwrap();
        let mut read_back = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut read_back).unwrap();
        assert_eq!(read_back, b"hello");

        let path = Artifact::Path(PathBuf::from("/tmp/a.txt"));
        assert_eq!(path.path(), Some(Path::new("/tmp/a.txt")));
        assert!(path.reader().is_none());
        assert!(path.cache_ref().is_none());
    }
}
