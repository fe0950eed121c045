//! Destination router.
//!
//! Drains a response body into its [`Destination`] while the wrapping
//! [`HashingStream`] computes the content hash over the very same pass.
//! Files are staged and renamed on completion, so a body failing mid-way
//! never leaves a complete-looking file behind.

use super::Destination;
use crate::backend::BodyStream;
use crate::cache::{CacheAdapter, CacheKey, CacheMetadata, StoreBody};
use crate::download::{Artifact, ContentDigest, HashingStream};
use crate::error::{CacheError, FetchFailure};
use crate::utils::StagedFile;

use bytes::BytesMut;
use futures::StreamExt;
use std::io;
use thiserror::Error;
use tracing::debug;

/// Why a body could not be routed.
#[derive(Error, Debug)]
pub enum RouteError {
    /// The body stream failed mid-transfer.
    #[error("transfer failed: {0}")]
    Body(FetchFailure),

    /// The destination file could not be written.
    #[error("cannot write destination: {0}")]
    Destination(#[source] io::Error),

    /// The cache store rejected the content.
    #[error("cannot store in cache: {0}")]
    Cache(#[source] CacheError),
}

impl From<CacheError> for RouteError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::Interrupted(failure) => RouteError::Body(failure),
            other => RouteError::Cache(other),
        }
    }
}

/// Where the bytes landed and what they hash to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub artifact: Artifact,
    pub digest: ContentDigest,
}

/// Cache entry to create when routing to [`Destination::Cache`].
#[derive(Debug)]
pub struct CacheTarget<'a> {
    pub key: &'a CacheKey,
    pub metadata: CacheMetadata,
}

/// Routes body streams to destinations.
#[derive(Debug, Clone, Default)]
pub struct Router {
    cache: Option<CacheAdapter>,
}

impl Router {
    /// Create a router, with the cache adapter used by [`Destination::Cache`].
    pub fn new(cache: Option<CacheAdapter>) -> Self {
        Self { cache }
    }

    /// Drain `body` into `destination`.
    pub async fn route(
        &self,
        mut body: HashingStream<BodyStream>,
        destination: &Destination,
        cache_target: Option<CacheTarget<'_>>,
    ) -> Result<Routed, RouteError> {
        let artifact = match destination {
            Destination::Buffer => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = body.next().await {
                    buffer.extend_from_slice(&chunk.map_err(RouteError::Body)?);
                }
                Artifact::Buffer(buffer.freeze())
            }
            Destination::Path(path) => {
                let mut staged = StagedFile::create(path)
                    .await
                    .map_err(RouteError::Destination)?;
                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(RouteError::Body)?;
                    staged
                        .write(&chunk)
                        .await
                        .map_err(RouteError::Destination)?;
                }
                let path = staged.commit().await.map_err(RouteError::Destination)?;
                Artifact::Path(path)
            }
            Destination::Cache => {
                let (adapter, target) = match (&self.cache, cache_target) {
                    (Some(adapter), Some(target)) => (adapter, target),
                    _ => {
                        return Err(RouteError::Cache(CacheError::Unavailable(
                            "no cache is configured".into(),
                        )))
                    }
                };
                let reference = adapter
                    .store(target.key, StoreBody::Stream(&mut body), target.metadata)
                    .await?;
                Artifact::Cache(reference)
            }
        };

        let digest = body.finish();
        debug!(destination = %destination, size = digest.size, "Routed body");
        Ok(Routed { artifact, digest })
    }
}
