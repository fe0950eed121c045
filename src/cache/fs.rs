//! Filesystem cache store.
//!
//! Layout, one directory per key sharded by the first two characters:
//!
//! ```text
//! <root>/ab/ab12.../content
//! <root>/ab/ab12.../metadata.json
//! ```
//!
//! Content and metadata are both written through a [`StagedFile`] and renamed
//! into place, so concurrent writers of the same key never interleave bytes.
//! The metadata of an entry being rewritten is removed first, so the entry is
//! absent rather than mismatched until the new metadata lands.

use super::{CacheMetadata, CacheRef, CacheStore, CachedEntry};
use crate::error::{CacheError, FetchFailure};
use crate::utils::StagedFile;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const CONTENT_FILE: &str = "content";
const METADATA_FILE: &str = "metadata.json";

/// Cache store keeping entries under a root directory.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CacheError::Unavailable(format!(
                "\"{}\" cannot be used as a cache key",
                key
            )));
        }
        let shard = &key[..key.len().min(2)];
        Ok(self.root.join(shard).join(key))
    }

    async fn remove_metadata(dir: &Path) -> Result<(), CacheError> {
        match fs::remove_file(dir.join(METADATA_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn not_found(key: &str, e: io::Error) -> CacheError {
    if e.kind() == io::ErrorKind::NotFound {
        CacheError::KeyNotFound(key.to_string())
    } else {
        CacheError::from(e)
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        let dir = self.entry_dir(key)?;
        let content = fs::try_exists(dir.join(CONTENT_FILE)).await?;
        let metadata = fs::try_exists(dir.join(METADATA_FILE)).await?;
        Ok(content && metadata)
    }

    async fn load(&self, key: &str) -> Result<CachedEntry, CacheError> {
        let dir = self.entry_dir(key)?;
        let raw = fs::read(dir.join(METADATA_FILE))
            .await
            .map_err(|e| not_found(key, e))?;
        let metadata: CacheMetadata =
            serde_json::from_slice(&raw).map_err(|e| CacheError::Corrupted {
                key: key.to_string(),
                reason: format!("unreadable metadata: {}", e),
            })?;

        let content = dir.join(CONTENT_FILE);
        let size = fs::metadata(&content)
            .await
            .map_err(|e| not_found(key, e))?
            .len();
        if size != metadata.size {
            return Err(CacheError::Corrupted {
                key: key.to_string(),
                reason: format!("content is {} bytes, metadata says {}", size, metadata.size),
            });
        }

        Ok(CachedEntry {
            reference: CacheRef {
                key: key.to_string(),
                path: Some(content),
            },
            metadata,
        })
    }

    async fn read(&self, key: &str) -> Result<Bytes, CacheError> {
        let dir = self.entry_dir(key)?;
        let content = fs::read(dir.join(CONTENT_FILE))
            .await
            .map_err(|e| not_found(key, e))?;
        Ok(Bytes::from(content))
    }

    async fn export(&self, key: &str, dest: &Path) -> Result<(), CacheError> {
        let content = self.entry_dir(key)?.join(CONTENT_FILE);
        if !fs::try_exists(&content).await? {
            return Err(CacheError::KeyNotFound(key.to_string()));
        }

        let mut staged = StagedFile::create(dest)
            .await
            .map_err(CacheError::destination(dest))?;
        staged
            .copy_from(&content)
            .await
            .map_err(CacheError::destination(dest))?;
        staged.commit().await.map_err(CacheError::destination(dest))?;
        Ok(())
    }

    async fn write_stream(
        &self,
        key: &str,
        body: &mut (dyn Stream<Item = Result<Bytes, FetchFailure>> + Send + Unpin),
    ) -> Result<CacheRef, CacheError> {
        let dir = self.entry_dir(key)?;
        let content = dir.join(CONTENT_FILE);

        let mut staged = StagedFile::create(&content).await?;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(CacheError::Interrupted)?;
            staged.write(&chunk).await?;
        }

        Self::remove_metadata(&dir).await?;
        staged.commit().await?;
        debug!(key, "Wrote cache content");

        Ok(CacheRef {
            key: key.to_string(),
            path: Some(content),
        })
    }

    async fn write_file(&self, key: &str, source: &Path) -> Result<CacheRef, CacheError> {
        let dir = self.entry_dir(key)?;
        fs::create_dir_all(&dir).await?;
        Self::remove_metadata(&dir).await?;

        // Always a private copy: the source stays owned by the caller.
        let content = dir.join(CONTENT_FILE);
        let mut staged = StagedFile::create(&content).await?;
        staged.copy_from(source).await?;
        staged.commit().await?;

        Ok(CacheRef {
            key: key.to_string(),
            path: Some(content),
        })
    }

    async fn write_metadata(&self, key: &str, metadata: &CacheMetadata) -> Result<(), CacheError> {
        let dir = self.entry_dir(key)?;
        let encoded = serde_json::to_vec_pretty(metadata).map_err(|e| CacheError::Corrupted {
            key: key.to_string(),
            reason: format!("metadata cannot be encoded: {}", e),
        })?;

        let mut staged = StagedFile::create(&dir.join(METADATA_FILE)).await?;
        staged.write(&encoded).await?;
        staged.commit().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let dir = self.entry_dir(key)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::sha256_hex;
    use crate::error::FailureKind;
    use chrono::Utc;

    const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn metadata(content: &[u8]) -> CacheMetadata {
        CacheMetadata {
            url: "https://example.test/a.txt".into(),
            method: "GET".into(),
            status: 200,
            content_hash: sha256_hex(content),
            size: content.len() as u64,
            stored_at: Utc::now(),
            ..CacheMetadata::default()
        }
    }

    async fn put(store: &FsCacheStore, key: &str, content: &'static [u8]) {
        let mut body = futures::stream::iter(vec![Ok::<_, FetchFailure>(Bytes::from_static(content))]);
        store.write_stream(key, &mut body).await.unwrap();
        store.write_metadata(key, &metadata(content)).await.unwrap();
    }

    #[tokio::test]
    async fn test_layout_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path());
        put(&store, KEY, b"hello").await;

        let entry_dir = dir.path().join("01").join(KEY);
        assert!(entry_dir.join("content").is_file());
        assert!(entry_dir.join("metadata.json").is_file());

        assert!(store.contains(KEY).await.unwrap());
        let entry = store.load(KEY).await.unwrap();
        assert_eq!(entry.metadata.content_hash, sha256_hex(b"hello"));
        assert_eq!(entry.reference.path.as_deref(), Some(entry_dir.join("content").as_path()));
        assert_eq!(store.read(KEY).await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path());

        assert!(!store.contains(KEY).await.unwrap());
        assert!(matches!(store.load(KEY).await, Err(CacheError::KeyNotFound(_))));
        assert!(matches!(store.read(KEY).await, Err(CacheError::KeyNotFound(_))));
        assert!(!store.remove(KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_content_without_metadata_is_not_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path());
        let mut body = futures::stream::iter(vec![Ok::<_, FetchFailure>(Bytes::from_static(b"orphan"))]);
        store.write_stream(KEY, &mut body).await.unwrap();

        assert!(!store.contains(KEY).await.unwrap());
        assert!(matches!(store.load(KEY).await, Err(CacheError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_interrupted_write_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path());
        put(&store, KEY, b"first").await;

        let mut body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"sec")),
            Err(FetchFailure::new(FailureKind::ConnectionReset, "reset")),
        ]);
        let err = store.write_stream(KEY, &mut body).await.unwrap_err();
        assert!(matches!(err, CacheError::Interrupted(_)));

        assert_eq!(store.read(KEY).await.unwrap().as_ref(), b"first");
        assert!(store.contains(KEY).await.unwrap());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("01").join(KEY))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 2);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path());
        put(&store, KEY, b"hello").await;
        std::fs::write(dir.path().join("01").join(KEY).join("content"), b"hi").unwrap();

        assert!(matches!(store.load(KEY).await, Err(CacheError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_export_and_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path().join("cache"));
        put(&store, KEY, b"exported").await;

        let out = dir.path().join("out").join("file.bin");
        store.export(KEY, &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"exported");

        let other = "ff".repeat(32);
        let reference = store.write_file(&other, &out).await.unwrap();
        store.write_metadata(&other, &metadata(b"exported")).await.unwrap();
        assert_eq!(std::fs::read(reference.path.unwrap()).unwrap(), b"exported");
        assert!(store.contains(&other).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path());
        assert!(matches!(
            store.contains("../escape").await,
            Err(CacheError::Unavailable(_))
        ));
        assert!(matches!(store.contains("").await, Err(CacheError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path());
        put(&store, KEY, b"bye").await;

        assert!(store.remove(KEY).await.unwrap());
        assert!(!store.contains(KEY).await.unwrap());
    }
}
