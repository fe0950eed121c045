//! In-memory cache store.

use super::{CacheMetadata, CacheRef, CacheStore, CachedEntry};
use crate::error::{CacheError, FetchFailure};
use crate::utils::StagedFile;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default, Clone)]
struct Entry {
    content: Option<Bytes>,
    metadata: Option<CacheMetadata>,
}

/// Cache store living in process memory.
///
/// Entries are replaced as a whole: content is only inserted once the body
/// was fully read, so readers never see partial bytes.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of complete entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| e.content.is_some() && e.metadata.is_some())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether the store holds no complete entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .read()
            .map_err(|_| CacheError::Unavailable("memory cache lock poisoned".into()))
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .write()
            .map_err(|_| CacheError::Unavailable("memory cache lock poisoned".into()))
    }

    fn complete(&self, key: &str) -> Result<(Bytes, CacheMetadata), CacheError> {
        let entries = self.read_guard()?;
        match entries.get(key) {
            Some(Entry {
                content: Some(content),
                metadata: Some(metadata),
            }) => Ok((content.clone(), metadata.clone())),
            _ => Err(CacheError::KeyNotFound(key.to_string())),
        }
    }

    fn put_content(&self, key: &str, content: Bytes) -> Result<CacheRef, CacheError> {
        let mut entries = self.write_guard()?;
        entries.insert(
            key.to_string(),
            Entry {
                content: Some(content),
                metadata: None,
            },
        );
        Ok(CacheRef {
            key: key.to_string(),
            path: None,
        })
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        let entries = self.read_guard()?;
        Ok(entries
            .get(key)
            .is_some_and(|e| e.content.is_some() && e.metadata.is_some()))
    }

    async fn load(&self, key: &str) -> Result<CachedEntry, CacheError> {
        let (_, metadata) = self.complete(key)?;
        Ok(CachedEntry {
            reference: CacheRef {
                key: key.to_string(),
                path: None,
            },
            metadata,
        })
    }

    async fn read(&self, key: &str) -> Result<Bytes, CacheError> {
        self.complete(key).map(|(content, _)| content)
    }

    async fn export(&self, key: &str, dest: &Path) -> Result<(), CacheError> {
        let (content, _) = self.complete(key)?;
        let mut staged = StagedFile::create(dest)
            .await
            .map_err(CacheError::destination(dest))?;
        staged
            .write(&content)
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
        let mut content = BytesMut::new();
        while let Some(chunk) = body.next().await {
            content.extend_from_slice(&chunk.map_err(CacheError::Interrupted)?);
        }
        self.put_content(key, content.freeze())
    }

    async fn write_file(&self, key: &str, source: &Path) -> Result<CacheRef, CacheError> {
        let content = tokio::fs::read(source).await?;
        self.put_content(key, Bytes::from(content))
    }

    async fn write_metadata(&self, key: &str, metadata: &CacheMetadata) -> Result<(), CacheError> {
        let mut entries = self.write_guard()?;
        match entries.get_mut(key) {
            Some(entry) if entry.content.is_some() => {
                entry.metadata = Some(metadata.clone());
                Ok(())
            }
            _ => Err(CacheError::KeyNotFound(key.to_string())),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.write_guard()?;
        Ok(entries.remove(key).is_some())
    }
}
