//! Record construction.
//!
//! [`record`] is a pure function turning the outcome of a download into a
//! [`DownloadRecord`]. It performs no I/O and is the only place records are
//! built, which keeps the cache-hit, success and failure paths uniform.

use super::descriptor::Descriptor;
use super::hash::ContentDigest;
use super::record::{Artifact, DownloadRecord, Status};
use crate::cache::{CacheKey, CacheMetadata};
use crate::error::DownloadError;
use crate::utils::headers::filename_from_headers;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Start and end of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Timestamps {
    /// Timestamps for a download that started at `started_at` and ends now.
    pub fn finished_now(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// How a download ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Served from the cache.
    CacheHit {
        cache_key: CacheKey,
        metadata: CacheMetadata,
        artifact: Artifact,
    },
    /// Fetched from the network and routed to its destination.
    Fetched {
        cache_key: Option<CacheKey>,
        status_code: u16,
        headers: BTreeMap<String, String>,
        digest: ContentDigest,
        artifact: Artifact,
        attempts: u32,
    },
    /// Failed after `attempts` backend invocations.
    Failed {
        cache_key: Option<CacheKey>,
        status_code: Option<u16>,
        headers: BTreeMap<String, String>,
        error: DownloadError,
        attempts: u32,
    },
}

/// Build the record of a download.
///
/// `backend_id` is ignored for cache hits, which never touch a backend.
pub fn record(
    descriptor: Arc<Descriptor>,
    outcome: Outcome,
    timestamps: Timestamps,
    backend_id: Option<&str>,
) -> DownloadRecord {
    let started_at = timestamps.started_at;
    let finished_at = timestamps.finished_at.max(started_at);

    match outcome {
        Outcome::CacheHit {
            cache_key,
            metadata,
            artifact,
        } => DownloadRecord {
            status: Status::CacheHit,
            started_at,
            finished_at,
            content_hash: Some(metadata.content_hash),
            backend_used: None,
            error: None,
            status_code: Some(metadata.status),
            response_headers: metadata.headers,
            size: metadata.size,
            filename: metadata.filename.or_else(|| descriptor.url_filename()),
            cache_key: Some(cache_key),
            artifact: Some(artifact),
            attempts: 0,
            descriptor,
        },
        Outcome::Fetched {
            cache_key,
            status_code,
            headers,
            digest,
            artifact,
            attempts,
        } => DownloadRecord {
            status: Status::Success,
            started_at,
            finished_at,
            content_hash: Some(digest.sha256),
            backend_used: backend_id.map(String::from),
            error: None,
            status_code: Some(status_code),
            filename: filename_from_headers(&headers).or_else(|| descriptor.url_filename()),
            response_headers: headers,
            size: digest.size,
            cache_key,
            artifact: Some(artifact),
            attempts,
            descriptor,
        },
        Outcome::Failed {
            cache_key,
            status_code,
            headers,
            error,
            attempts,
        } => DownloadRecord {
            status: Status::Failed,
            started_at,
            finished_at,
            content_hash: None,
            backend_used: backend_id.map(String::from),
            error: Some(error),
            status_code,
            response_headers: headers,
            size: 0,
            filename: None,
            cache_key,
            artifact: None,
            attempts,
            descriptor,
        },
    }
}
