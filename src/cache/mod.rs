//! Cache integration.
//!
//! The cache is an external collaborator reached through the [`CacheStore`]
//! trait: a key-value store over byte content plus [`CacheMetadata`], keyed
//! by plain strings. The manager never talks to a store directly, it goes
//! through the [`CacheAdapter`] which derives keys from descriptors and keeps
//! the store/metadata sequencing in one place.
//!
//! Two stores ship with the crate:
//!
//! - [`FsCacheStore`] - one directory per key holding `content` and
//!   `metadata.json`, every write staged in a temporary file and renamed
//! - [`MemoryCacheStore`] - process-local map, handy for tests and short
//!   lived tools
//!
//! # Examples
//!
//! ```rust,no_run
//! use fetchkeep::cache::FsCacheStore;
//! use fetchkeep::DownloadManagerBuilder;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), fetchkeep::Error> {
//! let manager = DownloadManagerBuilder::new()
//!     .cache(Arc::new(FsCacheStore::new("/var/cache/fetchkeep")))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod fs;
pub mod memory;

pub use adapter::{CacheAdapter, CacheKey, KeyField, StoreBody};
pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;

use crate::error::{CacheError, FetchFailure};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Stable reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheRef {
    /// Key the artifact is stored under.
    pub key: String,
    /// Location of the content on disk, for stores that have one.
    pub path: Option<PathBuf>,
}

/// Metadata persisted next to every cached artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// URL the content was fetched from, query parameters included.
    pub url: String,
    /// HTTP method of the request.
    pub method: String,
    /// HTTP status of the response.
    pub status: u16,
    /// Response headers, lowercase names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Hex SHA-256 of the content.
    pub content_hash: String,
    /// Size of the content in bytes.
    pub size: u64,
    /// When the entry was stored.
    pub stored_at: DateTime<Utc>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub content_md5: Option<String>,
    /// File name announced by the server or derived from the URL.
    #[serde(default)]
    pub filename: Option<String>,
    /// Backend that fetched the content.
    #[serde(default)]
    pub backend: Option<String>,
}

impl CacheMetadata {
    /// Whether the entry was stored more than `max_age` ago.
    pub fn is_older_than(&self, max_age: std::time::Duration) -> bool {
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => Utc::now() - self.stored_at > max_age,
            Err(_) => false,
        }
    }
}

/// A stored artifact with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub reference: CacheRef,
    pub metadata: CacheMetadata,
}

/// Key-value store over byte content plus metadata.
///
/// Implementations must be safe to call concurrently. Writes are atomic per
/// key: a reader sees either the previous entry, no entry, or the complete new
/// one. An entry only exists once both its content and its metadata were
/// written; [`CacheStore::write_metadata`] is always called last.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether a complete entry exists for `key`.
    async fn contains(&self, key: &str) -> Result<bool, CacheError>;

    /// Reference and metadata of an entry, [`CacheError::KeyNotFound`] if absent.
    async fn load(&self, key: &str) -> Result<CachedEntry, CacheError>;

    /// Content of an entry.
    async fn read(&self, key: &str) -> Result<Bytes, CacheError>;

    /// Copy the content of an entry to `dest`, atomically.
    async fn export(&self, key: &str, dest: &Path) -> Result<(), CacheError>;

    /// Store content by draining a body stream.
    ///
    /// A failing stream aborts the write with [`CacheError::Interrupted`] and
    /// leaves no content behind.
    async fn write_stream(
        &self,
        key: &str,
        body: &mut (dyn Stream<Item = Result<Bytes, FetchFailure>> + Send + Unpin),
    ) -> Result<CacheRef, CacheError>;

    /// Store the content of an existing file.
    async fn write_file(&self, key: &str, source: &Path) -> Result<CacheRef, CacheError>;

    /// Store the metadata of an entry whose content was just written.
    async fn write_metadata(&self, key: &str, metadata: &CacheMetadata) -> Result<(), CacheError>;

    /// Remove an entry. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;
}
