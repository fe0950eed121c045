//! Incremental content hashing.
//!
//! Content hashes are SHA-256 digests rendered as lowercase hex. They are
//! computed while the bytes flow to their destination: [`HashingStream`] wraps
//! a body stream and feeds every chunk to the digest as it is yielded, so the
//! hash never requires a second read of the data.
//!
//! # Examples
//!
//! ```rust
//! use fetchkeep::download::hash::sha256_hex;
//!
//! assert_eq!(
//!     sha256_hex(b"hello"),
//!     "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
//! );
//! ```

use crate::error::FetchFailure;

use bytes::Bytes;
use futures::Stream;
use indicatif::ProgressBar;
use sha2::{Digest, Sha256};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Hex encoded SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Final digest and size of a stream that went through a [`HashingStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex SHA-256.
    pub sha256: String,
    /// Number of bytes hashed.
    pub size: u64,
}

/// Stream adapter hashing every chunk it yields.
///
/// Errors are passed through untouched; the digest only covers successfully
/// yielded chunks.
pub struct HashingStream<S> {
    inner: S,
    hasher: Sha256,
    size: u64,
    progress: Option<ProgressBar>,
}

impl<S> HashingStream<S> {
    /// Wrap a body stream.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
            progress: None,
        }
    }

    /// Advance a progress bar by the size of every chunk.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Digest of everything yielded so far.
    pub fn digest(&self) -> ContentDigest {
        ContentDigest {
            sha256: hex::encode(self.hasher.clone().finalize()),
            size: self.size,
        }
    }

    /// Consume the adapter and return the digest.
    pub fn finish(self) -> ContentDigest {
        ContentDigest {
            sha256: hex::encode(self.hasher.finalize()),
            size: self.size,
        }
    }
}

impl<S> Stream for HashingStream<S>
where
    S: Stream<Item = Result<Bytes, FetchFailure>> + Unpin,
{
    type Item = Result<Bytes, FetchFailure>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.hasher.update(&chunk);
                this.size += chunk.len() as u64;
                if let Some(ref pb) = this.progress {
                    pb.inc(chunk.len() as u64);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
