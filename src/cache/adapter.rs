//! Cache adapter.
//!
//! Derives cache keys from descriptors and sequences the calls to the
//! [`CacheStore`]. Keys are the hex SHA-256 of the descriptor fields selected
//! by the configured [`KeyField`] set, so identical descriptors always map to
//! the same key.

use super::{CacheMetadata, CacheRef, CacheStore, CachedEntry};
use crate::backend::BodyStream;
use crate::download::{Descriptor, HashingStream};
use crate::error::{CacheError, FetchFailure};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Descriptor fields that can take part in the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyField {
    /// The request URL, extra query parameters included.
    Url,
    /// The HTTP method.
    Method,
    /// The request headers, names lowercased and sorted.
    Headers,
    /// The request payload.
    Body,
}

impl KeyField {
    /// The default key fields: URL and method.
    pub fn defaults() -> BTreeSet<KeyField> {
        BTreeSet::from([KeyField::Url, KeyField::Method])
    }

    fn name(&self) -> &'static str {
        match self {
            KeyField::Url => "url",
            KeyField::Method => "method",
            KeyField::Headers => "headers",
            KeyField::Body => "body",
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyField {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "url" => Ok(KeyField::Url),
            "method" => Ok(KeyField::Method),
            "headers" => Ok(KeyField::Headers),
            "body" => Ok(KeyField::Body),
            other => Err(crate::error::Error::Validation(format!(
                "unknown cache key field \"{}\"",
                other
            ))),
        }
    }
}

/// Key of a cache entry: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already derived key.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the key of a descriptor from the selected fields.
///
/// Every field is written as a tag followed by length-prefixed values, so
/// distinct field contents can never produce the same input to the digest.
pub fn derive_key(descriptor: &Descriptor, fields: &BTreeSet<KeyField>) -> CacheKey {
    let mut hasher = Sha256::new();

    for field in fields {
        hasher.update(field.name().as_bytes());
        match field {
            KeyField::Url => {
                let url = descriptor
                    .request_url()
                    .map(|url| url.to_string())
                    .unwrap_or_else(|_| descriptor.url().to_string());
                update_framed(&mut hasher, url.as_bytes());
            }
            KeyField::Method => {
                update_framed(&mut hasher, descriptor.method().as_str().as_bytes())
            }
            KeyField::Headers => {
                let mut headers: Vec<(&str, &[u8])> = descriptor
                    .headers()
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_bytes()))
                    .collect();
                headers.sort();
                hasher.update((headers.len() as u64).to_be_bytes());
                for (name, value) in headers {
                    update_framed(&mut hasher, name.as_bytes());
                    update_framed(&mut hasher, value);
                }
            }
            KeyField::Body => match descriptor.body() {
                Some(body) => {
                    hasher.update([1u8]);
                    update_framed(&mut hasher, body);
                }
                None => hasher.update([0u8]),
            },
        }
    }

    CacheKey(hex::encode(hasher.finalize()))
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Content handed to [`CacheAdapter::store`].
pub enum StoreBody<'a> {
    /// A response body still streaming; its digest is taken once drained.
    Stream(&'a mut HashingStream<BodyStream>),
    /// Bytes already in memory.
    Bytes(Bytes),
    /// A file already written.
    File(&'a Path),
}

/// Facade over the external cache store.
#[derive(Clone)]
pub struct CacheAdapter {
    store: Arc<dyn CacheStore>,
    key_fields: BTreeSet<KeyField>,
}

impl fmt::Debug for CacheAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheAdapter")
            .field("key_fields", &self.key_fields)
            .finish()
    }
}

impl CacheAdapter {
    /// Create an adapter over `store` deriving keys from `key_fields`.
    pub fn new(store: Arc<dyn CacheStore>, key_fields: BTreeSet<KeyField>) -> Self {
        Self { store, key_fields }
    }

    /// The fields the keys are derived from.
    pub fn key_fields(&self) -> &BTreeSet<KeyField> {
        &self.key_fields
    }

    /// Deterministic key of a descriptor.
    pub fn cache_key(&self, descriptor: &Descriptor) -> CacheKey {
        derive_key(descriptor, &self.key_fields)
    }

    /// Whether an entry exists for `key`.
    pub async fn has(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.store.contains(key.as_str()).await
    }

    /// Reference and stored metadata of an entry.
    pub async fn fetch_cached(&self, key: &CacheKey) -> Result<CachedEntry, CacheError> {
        self.store.load(key.as_str()).await
    }

    /// Content of an entry.
    pub async fn read(&self, key: &CacheKey) -> Result<Bytes, CacheError> {
        self.store.read(key.as_str()).await
    }

    /// Copy the content of an entry to `dest`.
    pub async fn export(&self, key: &CacheKey, dest: &Path) -> Result<(), CacheError> {
        self.store.export(key.as_str(), dest).await
    }

    /// Store content and metadata under `key`.
    ///
    /// For a streaming body the hash and size recorded in the metadata are
    /// the ones computed while the stream was written.
    pub async fn store(
        &self,
        key: &CacheKey,
        body: StoreBody<'_>,
        mut metadata: CacheMetadata,
    ) -> Result<CacheRef, CacheError> {
        let reference = match body {
            StoreBody::Stream(stream) => {
                let reference = self.store.write_stream(key.as_str(), &mut *stream).await?;
                let digest = stream.digest();
                metadata.content_hash = digest.sha256;
                metadata.size = digest.size;
                reference
            }
            StoreBody::Bytes(bytes) => {
                let mut once =
                    futures::stream::iter(std::iter::once(Ok::<_, FetchFailure>(bytes)));
                self.store.write_stream(key.as_str(), &mut once).await?
            }
            StoreBody::File(path) => self.store.write_file(key.as_str(), path).await?,
        };

        self.store.write_metadata(key.as_str(), &metadata).await?;
        debug!(key = %key, size = metadata.size, "Stored cache entry");
        Ok(reference)
    }

    /// Remove the entry of `key`.
    pub async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.store.remove(key.as_str()).await
    }
}
