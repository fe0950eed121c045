//! Fetchkeep is a crate mediating between "I want this URL" and "here are the
//! bytes, with provenance". It fetches resources over HTTP(S), optionally
//! routes them through a cache, and returns a [`DownloadRecord`] describing
//! every download: status, timestamps, headers, SHA-256 of the content and the
//! backend that served it.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fetchkeep::{Descriptor, Destination, DownloadManagerBuilder, Error, Status};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Error> {
//! let manager = DownloadManagerBuilder::new()
//!     .cache_dir("/tmp/fetchkeep")
//!     .build()?;
//!
//! let descriptor = Descriptor::try_from("https://example.com/data.csv")?;
//! let record = manager
//!     .download(descriptor, Some(Destination::path("/tmp/data.csv")))
//!     .await?;
//!
//! match record.status() {
//!     Status::Success | Status::CacheHit => println!("{:?}", record.content_hash()),
//!     Status::Failed => eprintln!("{}", record.error().map(|e| e.to_string()).unwrap_or_default()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`download`] - Descriptors, download records and hashing
//! - [`manager`] - The `DownloadManager` and its builder, retry and coalescing
//! - [`backend`] - The `Backend` trait with the reqwest and curl variants
//! - [`destination`] - Destinations and the router draining bodies into them
//! - [`cache`] - The cache adapter, the `CacheStore` trait and two stores
//! - [`freshness`] - Comparison of cached metadata with remote headers
//! - [`error`] - Raised errors and the failures captured in records
//! - [`progress`] - Progress bar styling and display management
//! - [`utils`] - Header helpers and staged files

pub mod backend;
pub mod cache;
pub mod destination;
pub mod download;
pub mod error;
pub mod freshness;
pub mod manager;
pub mod progress;
pub mod utils;

pub use backend::{Backend, BackendKind, BackendResponse, BodyStream};
pub use cache::{CacheAdapter, CacheKey, CacheMetadata, CacheStore, KeyField};
pub use destination::Destination;
pub use download::{Artifact, Descriptor, DownloadRecord, Part, Status};
pub use error::{CacheError, DownloadError, Error, ErrorKind, FailureKind, FetchFailure, Result};
pub use freshness::{Freshness, FreshnessMethod};
pub use manager::{Backoff, DownloadManager, DownloadManagerBuilder, ManagerConfig};
pub use progress::{ProgressBarOpts, StyleOptions};
