use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetchkeep::cache::MemoryCacheStore;
use fetchkeep::download::sha256_hex;
use fetchkeep::{
    Descriptor, Destination, DownloadManagerBuilder, ErrorKind, FailureKind, FreshnessMethod,
    Status,
};

mod common;
use common::helpers::*;

#[tokio::test]
async fn test_builder_rejects_zero_retries() {
    let result = DownloadManagerBuilder::hidden().retries(0).build();
    assert!(result.unwrap_err().is_validation());
}

#[tokio::test]
async fn test_cache_destination_requires_cache() {
    let backend = ScriptedBackend::hello();
    let manager = test_builder(backend.clone()).build().unwrap();

    let err = manager
        .download(test_descriptor(), Some(Destination::Cache))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_default_destination_without_cache_is_buffer() {
    let manager = test_builder(ScriptedBackend::hello()).build().unwrap();

    let record = manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(record.artifact().unwrap().bytes().unwrap().as_ref(), HELLO);
    assert!(record.cache_key().is_none());
}

#[tokio::test]
async fn test_default_destination_with_cache_is_cache() {
    let manager = test_builder(ScriptedBackend::hello())
        .cache(Arc::new(MemoryCacheStore::new()))
        .build()
        .unwrap();

    let record = manager.download(test_descriptor(), None).await.unwrap();

    assert!(record.artifact().unwrap().cache_ref().is_some());
    assert_eq!(
        record.cache_key(),
        Some(&manager.cache_key(&test_descriptor()))
    );
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let backend = ScriptedBackend::new(vec![Reply::Fail(FailureKind::Tls)]);
    let manager = test_builder(backend.clone()).retries(5).build().unwrap();

    let record = manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(record.status(), Status::Failed);
    assert_eq!(record.error().unwrap().kind, ErrorKind::PermanentFetch);
    assert_eq!(record.attempts(), 1);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_not_found_records_status_and_headers() {
    let backend = ScriptedBackend::new(vec![Reply::Status(404)]);
    let manager = test_builder(backend.clone()).build().unwrap();

    let record = manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(record.status(), Status::Failed);
    assert_eq!(record.status_code(), Some(404));
    assert_eq!(record.error().unwrap().kind, ErrorKind::PermanentFetch);
    assert_eq!(
        record.response_headers().get("etag").map(String::as_str),
        Some("\"v1\"")
    );
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_server_errors_are_retried_then_succeed() {
    let backend = ScriptedBackend::new(vec![Reply::Status(503), Reply::Ok(HELLO)]);
    let manager = test_builder(backend.clone()).build().unwrap();

    let record = manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(record.status(), Status::Success);
    assert_eq!(record.status_code(), Some(200));
    assert_eq!(record.attempts(), 2);
}

#[tokio::test]
async fn test_allowed_status_is_accepted() {
    let backend = ScriptedBackend::new(vec![Reply::Status(404)]);
    let manager = test_builder(backend).allow_status(404).build().unwrap();

    let record = manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(record.status(), Status::Success);
    assert_eq!(record.status_code(), Some(404));
    assert_eq!(record.size(), 0);
    assert_eq!(record.content_hash(), Some(sha256_hex(b"").as_str()));
}

#[tokio::test]
async fn test_attempt_timeout_is_transient() {
    let backend = ScriptedBackend::new(vec![Reply::Slow(Duration::from_secs(5), HELLO)]);
    let manager = test_builder(backend.clone())
        .retries(2)
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let record = manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(record.status(), Status::Failed);
    assert_eq!(record.error().unwrap().kind, ErrorKind::TransientFetch);
    assert_eq!(record.attempts(), 2);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_unavailable_cache_degrades_to_network() {
    init_tracing();
    let backend = ScriptedBackend::hello();
    let manager = test_builder(backend.clone())
        .cache(Arc::new(UnavailableStore))
        .build()
        .unwrap();

    let record = manager
        .download(test_descriptor(), Some(Destination::Buffer))
        .await
        .unwrap();

    assert_eq!(record.status(), Status::Success);
    assert_eq!(record.artifact().unwrap().bytes().unwrap().as_ref(), HELLO);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_unavailable_cache_fails_cache_destination() {
    let manager = test_builder(ScriptedBackend::hello())
        .cache(Arc::new(UnavailableStore))
        .build()
        .unwrap();

    let record = manager
        .download(test_descriptor(), Some(Destination::Cache))
        .await
        .unwrap();

    assert_eq!(record.status(), Status::Failed);
    assert_eq!(record.error().unwrap().kind, ErrorKind::Cache);
}

#[tokio::test]
async fn test_unwritable_destination_fails() {
    let dir = create_temp_dir();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let manager = test_builder(ScriptedBackend::hello()).build().unwrap();

    let record = manager
        .download(
            test_descriptor(),
            Some(Destination::Path(blocker.join("a.txt"))),
        )
        .await
        .unwrap();

    assert_eq!(record.status(), Status::Failed);
    assert_eq!(record.error().unwrap().kind, ErrorKind::Destination);
}

#[tokio::test]
async fn test_on_complete_sees_every_record() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let manager = test_builder(ScriptedBackend::hello())
        .cache(Arc::new(MemoryCacheStore::new()))
        .on_complete(move |record| {
            assert!(record.is_ok());
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    manager.download(test_descriptor(), None).await.unwrap();
    manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_download_is_a_cache_hit() {
    let backend = ScriptedBackend::hello();
    let manager = test_builder(backend.clone())
        .cache(Arc::new(MemoryCacheStore::new()))
        .build()
        .unwrap();

    let first = manager.download(test_descriptor(), None).await.unwrap();
    let second = manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(first.status(), Status::Success);
    assert_eq!(second.status(), Status::CacheHit);
    assert_eq!(second.attempts(), 0);
    assert_eq!(second.content_hash(), first.content_hash());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_max_age_expires_entries() {
    let backend = ScriptedBackend::hello();
    let manager = test_builder(backend.clone())
        .cache(Arc::new(MemoryCacheStore::new()))
        .max_age(Duration::ZERO)
        .build()
        .unwrap();

    manager.download(test_descriptor(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = manager.download(test_descriptor(), None).await.unwrap();

    assert_eq!(second.status(), Status::Success);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_download_many() {
    let backend = ScriptedBackend::hello();
    let manager = test_builder(backend.clone())
        .cache(Arc::new(MemoryCacheStore::new()))
        .concurrent_downloads(2)
        .build()
        .unwrap();
    let descriptors = vec![
        Descriptor::new("https://example.test/a.txt"),
        Descriptor::new("https://example.test/b.txt"),
        Descriptor::new("https://example.test/c.txt"),
        Descriptor::new(""),
    ];

    let results = manager.download_many(&descriptors).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter(|r| r.status() == Status::Success)
            .count(),
        3
    );
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let backend = ScriptedBackend::hello();
    let manager = test_builder(backend.clone())
        .cache(Arc::new(MemoryCacheStore::new()))
        .build()
        .unwrap();

    manager.download(test_descriptor(), None).await.unwrap();
    assert!(manager.invalidate(&test_descriptor()).await.unwrap());
    assert!(!manager.invalidate(&test_descriptor()).await.unwrap());

    let record = manager.download(test_descriptor(), None).await.unwrap();
    assert_eq!(record.status(), Status::Success);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_revalidate_with_matching_etag() {
    let manager = test_builder(ScriptedBackend::hello())
        .cache(Arc::new(MemoryCacheStore::new()))
        .build()
        .unwrap();

    manager.download(test_descriptor(), None).await.unwrap();
    let freshness = manager
        .revalidate(&test_descriptor(), FreshnessMethod::Etag)
        .await
        .unwrap();

    assert!(freshness.current);
}

#[tokio::test]
async fn test_revalidate_unreachable_backend_raises() {
    let backend = ScriptedBackend::new(vec![Reply::Ok(HELLO), Reply::Fail(FailureKind::Dns)]);
    let manager = test_builder(backend)
        .cache(Arc::new(MemoryCacheStore::new()))
        .build()
        .unwrap();

    manager.download(test_descriptor(), None).await.unwrap();
    let result = manager
        .revalidate(&test_descriptor(), FreshnessMethod::Auto)
        .await;

    assert!(matches!(result, Err(fetchkeep::Error::Fetch(_))));
}

#[tokio::test]
async fn test_revalidate_missing_entry() {
    let manager = test_builder(ScriptedBackend::hello())
        .cache(Arc::new(MemoryCacheStore::new()))
        .build()
        .unwrap();

    let result = manager
        .revalidate(&test_descriptor(), FreshnessMethod::Auto)
        .await;

    assert!(matches!(result, Err(fetchkeep::Error::Cache(_))));
}

#[tokio::test]
async fn test_backend_name() {
    let manager = test_builder(ScriptedBackend::hello()).build().unwrap();
    assert_eq!(manager.backend_name(), BACKEND_NAME);
}

#[tokio::test]
async fn test_unwritable_destination_on_cache_hit_skips_network() {
    let dir = create_temp_dir();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let backend = ScriptedBackend::hello();
    let manager = test_builder(backend.clone())
        .cache(Arc::new(MemoryCacheStore::new()))
        .build()
        .unwrap();

    manager.download(test_descriptor(), None).await.unwrap();
    let record = manager
        .download(
            test_descriptor(),
            Some(Destination::Path(blocker.join("a.txt"))),
        )
        .await
        .unwrap();

    assert_eq!(record.status(), Status::Failed);
    assert_eq!(record.error().unwrap().kind, ErrorKind::Destination);
    assert_eq!(record.attempts(), 0);
    assert_eq!(backend.calls(), 1);
}
