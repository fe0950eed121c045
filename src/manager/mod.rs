//! Download manager module.
//!
//! The [`DownloadManager`] is the single entry point of the crate. It owns one
//! backend and an optional cache adapter for its whole lifetime, both chosen
//! by the [`DownloadManagerBuilder`].
//!
//! # Overview
//!
//! - [`builder`] - Builder pattern for creating managers
//! - [`config`] - Configuration structures and defaults
//! - [`manager`](self::manager) - The coordinator itself
//! - [`retry`] - Attempt budget and backoff
//!
//! Concurrent downloads of descriptors sharing a cache key are coalesced: one
//! network fetch runs, the other callers await its record.
//!
//! # Examples
//!
//! ```rust,no_run
//! use fetchkeep::{Descriptor, Destination, DownloadManagerBuilder, Status};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), fetchkeep::Error> {
//! let manager = DownloadManagerBuilder::new()
//!     .cache_dir("/tmp/fetchkeep-cache")
//!     .retries(4)
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let record = manager
//!     .download(
//!         Descriptor::new("https://example.com/report.csv"),
//!         Some(Destination::path("/tmp/report.csv")),
//!     )
//!     .await?;
//! assert!(matches!(record.status(), Status::Success | Status::CacheHit | Status::Failed));
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
mod inflight;
#[allow(clippy::module_inception)]
pub mod manager;
pub mod retry;

pub use builder::DownloadManagerBuilder;
pub use config::{DownloadCallback, ManagerConfig};
pub use manager::DownloadManager;
pub use retry::{Backoff, RetryPolicy};
