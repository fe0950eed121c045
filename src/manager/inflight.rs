//! Coalescing of concurrent downloads sharing a cache key.
//!
//! The registry maps a key to a weak handle on the shared future of the
//! download currently running for it. The lock only guards the
//! check-and-insert step; the transfer itself runs outside of it. Holding weak
//! handles means a download every caller abandoned is dropped, releasing its
//! connection and staged file, and the next caller starts afresh.

use crate::cache::CacheKey;
use crate::destination::Destination;
use crate::download::DownloadRecord;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub(crate) type SharedDownload = Shared<BoxFuture<'static, DownloadRecord>>;

struct Entry {
    id: u64,
    destination: Destination,
    download: WeakShared<BoxFuture<'static, DownloadRecord>>,
}

/// Outcome of [`InFlight::join`].
pub(crate) enum Joined {
    /// The caller started the download.
    Leader(SharedDownload),
    /// Another caller is downloading the same key.
    Follower {
        download: SharedDownload,
        /// Whether the running download writes to the caller's destination.
        same_destination: bool,
    },
}

#[derive(Default)]
pub(crate) struct InFlight {
    next_id: AtomicU64,
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl InFlight {
    /// Join the download running for `key`, or start one with `start`.
    ///
    /// `start` receives the id to hand back to [`InFlight::finish`].
    pub(crate) async fn join<F>(&self, key: &CacheKey, destination: &Destination, start: F) -> Joined
    where
        F: FnOnce(u64) -> BoxFuture<'static, DownloadRecord>,
    {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(key) {
            if let Some(download) = entry.download.upgrade() {
                return Joined::Follower {
                    download,
                    same_destination: entry.destination == *destination,
                };
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let download = start(id).shared();
        if let Some(weak) = download.downgrade() {
            entries.insert(
                key.clone(),
                Entry {
                    id,
                    destination: destination.clone(),
                    download: weak,
                },
            );
        }
        Joined::Leader(download)
    }

    /// Forget the download `id` of `key`, once it produced its record.
    pub(crate) async fn finish(&self, key: &CacheKey, id: u64) {
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
