use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap as AxumHeaderMap, HeaderValue as AxumHeaderValue, StatusCode as AxumStatus};
use axum::response::{IntoResponse, Redirect};
use axum::routing::{get, post};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ETAG};
use reqwest::StatusCode;
use tempfile::TempDir;

use fetchkeep::backend::{Backend, BackendResponse, BodyStream};
use fetchkeep::cache::{CacheRef, CachedEntry, MemoryCacheStore};
use fetchkeep::{
    CacheError, CacheMetadata, CacheStore, Descriptor, DownloadManagerBuilder, FailureKind,
    FetchFailure,
};

// Common test constants
pub const TEST_URL: &str = "https://example.test/a.txt";
pub const HELLO: &[u8] = b"hello";
pub const BACKEND_NAME: &str = "scripted";

/// Creates a temporary directory for testing purposes
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temporary directory")
}

/// Random payload of `size` bytes
pub fn random_content(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut content = vec![0u8; size];
    rand::rng().fill_bytes(&mut content);
    content
}

/// Log to the test output when `RUST_LOG` is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Creates the descriptor used by most tests
pub fn test_descriptor() -> Descriptor {
    Descriptor::new(TEST_URL)
}

/// Asserts a directory holds no file at all, staged ones included
pub fn assert_dir_empty(dir: &Path) {
    let entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .expect("Failed to read directory")
        .map(|entry| entry.expect("Failed to read entry").path())
        .collect();
    assert!(entries.is_empty(), "Unexpected files: {:?}", entries);
}

// === Scripted backend ===

/// What the scripted backend answers to one fetch.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Status 200 with this body, split in two chunks.
    Ok(&'static [u8]),
    /// This status with an empty body.
    Status(u16),
    /// No response at all.
    Fail(FailureKind),
    /// Status 200, yields the bytes then fails mid-stream.
    Broken(&'static [u8], FailureKind),
    /// Waits, then answers like `Ok`.
    Slow(Duration, &'static [u8]),
    /// Status 200, yields the bytes then never ends.
    Stall(&'static [u8]),
}

/// Backend answering from a script and counting its invocations.
///
/// Replies are consumed in order; the last one repeats forever.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    last: Reply,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        let last = replies.last().cloned().unwrap_or(Reply::Ok(HELLO));
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            last,
            calls: AtomicUsize::new(0),
        })
    }

    /// Always answers `hello`.
    pub fn hello() -> Arc<Self> {
        Self::new(vec![Reply::Ok(HELLO)])
    }

    /// Never reaches any server.
    pub fn unreachable() -> Arc<Self> {
        Self::new(vec![Reply::Fail(FailureKind::Connect)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        replies.pop_front().unwrap_or_else(|| self.last.clone())
    }
}

fn response(status: StatusCode, chunks: Vec<Result<Bytes, FetchFailure>>) -> BackendResponse {
    let mut headers = HeaderMap::new();
    headers.insert(ETAG, HeaderValue::from_static("\"v1\""));
    let body: BodyStream = stream::iter(chunks).boxed();
    BackendResponse {
        status,
        headers,
        body,
    }
}

fn halves(body: &'static [u8]) -> Vec<Result<Bytes, FetchFailure>> {
    let (head, tail) = body.split_at(body.len() / 2);
    vec![Ok(Bytes::from_static(head)), Ok(Bytes::from_static(tail))]
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn fetch(
        &self,
        _descriptor: &Descriptor,
        _timeout: Duration,
    ) -> Result<BackendResponse, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_reply() {
            Reply::Ok(body) => Ok(response(StatusCode::OK, halves(body))),
            Reply::Status(code) => Ok(response(
                StatusCode::from_u16(code).unwrap(),
                Vec::new(),
            )),
            Reply::Fail(kind) => Err(FetchFailure::new(kind, "scripted failure")),
            Reply::Broken(prefix, kind) => Ok(response(
                StatusCode::OK,
                vec![
                    Ok(Bytes::from_static(prefix)),
                    Err(FetchFailure::new(kind, "scripted mid-stream failure")),
                ],
            )),
            Reply::Slow(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(response(StatusCode::OK, halves(body)))
            }
            Reply::Stall(prefix) => {
                let mut stalled = response(StatusCode::OK, Vec::new());
                stalled.body = stream::iter(vec![Ok::<_, FetchFailure>(Bytes::from_static(prefix))])
                    .chain(stream::pending())
                    .boxed();
                Ok(stalled)
            }
        }
    }
}

/// Builder with hidden bars, the scripted backend and no retry delay
pub fn test_builder(backend: Arc<ScriptedBackend>) -> DownloadManagerBuilder {
    DownloadManagerBuilder::hidden()
        .backend_impl(backend)
        .retry_delay(Duration::from_millis(1))
}

// === Cache stores ===

/// Memory store counting every call made to it
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryCacheStore,
    calls: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        self.count();
        self.inner.contains(key).await
    }

    async fn load(&self, key: &str) -> Result<CachedEntry, CacheError> {
        self.count();
        self.inner.load(key).await
    }

    async fn read(&self, key: &str) -> Result<Bytes, CacheError> {
        self.count();
        self.inner.read(key).await
    }

    async fn export(&self, key: &str, dest: &Path) -> Result<(), CacheError> {
        self.count();
        self.inner.export(key, dest).await
    }

    async fn write_stream(
        &self,
        key: &str,
        body: &mut (dyn Stream<Item = Result<Bytes, FetchFailure>> + Send + Unpin),
    ) -> Result<CacheRef, CacheError> {
        self.count();
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_stream(key, body).await
    }

    async fn write_file(&self, key: &str, source: &Path) -> Result<CacheRef, CacheError> {
        self.count();
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_file(key, source).await
    }

    async fn write_metadata(&self, key: &str, metadata: &CacheMetadata) -> Result<(), CacheError> {
        self.count();
        self.inner.write_metadata(key, metadata).await
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.count();
        self.inner.remove(key).await
    }
}

/// Store whose backing service is down
pub struct UnavailableStore;

fn down() -> CacheError {
    CacheError::Unavailable("cache service is down".into())
}

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn contains(&self, _key: &str) -> Result<bool, CacheError> {
        Err(down())
    }

    async fn load(&self, _key: &str) -> Result<CachedEntry, CacheError> {
        Err(down())
    }

    async fn read(&self, _key: &str) -> Result<Bytes, CacheError> {
        Err(down())
    }

    async fn export(&self, _key: &str, _dest: &Path) -> Result<(), CacheError> {
        Err(down())
    }

    async fn write_stream(
        &self,
        _key: &str,
        _body: &mut (dyn Stream<Item = Result<Bytes, FetchFailure>> + Send + Unpin),
    ) -> Result<CacheRef, CacheError> {
        Err(down())
    }

    async fn write_file(&self, _key: &str, _source: &Path) -> Result<CacheRef, CacheError> {
        Err(down())
    }

    async fn write_metadata(
        &self,
        _key: &str,
        _metadata: &CacheMetadata,
    ) -> Result<(), CacheError> {
        Err(down())
    }

    async fn remove(&self, _key: &str) -> Result<bool, CacheError> {
        Err(down())
    }
}

// === In-process HTTP server ===

/// Local HTTP server counting the GET requests it serves
pub struct TestServer {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn hello(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    let mut headers = AxumHeaderMap::new();
    headers.insert(header::ETAG, AxumHeaderValue::from_static("\"hello-v1\""));
    headers.insert(
        header::LAST_MODIFIED,
        AxumHeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    headers.insert(
        header::CONTENT_TYPE,
        AxumHeaderValue::from_static("text/plain"),
    );
    (AxumStatus::OK, headers, HELLO)
}

async fn attachment() -> impl IntoResponse {
    (
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"report.csv\"",
        )],
        "a,b\n1,2\n",
    )
}

async fn echo(headers: AxumHeaderMap, body: axum::body::Bytes) -> impl IntoResponse {
    let tag = headers
        .get("x-tag")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mut echoed = tag.into_bytes();
    echoed.extend_from_slice(&body);
    echoed
}

/// Answers `name=value` per field, `name=value(filename)` for files.
async fn multipart_fields(mut form: Multipart) -> Result<String, AxumStatus> {
    let mut fields = Vec::new();
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|_| AxumStatus::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let value = field.text().await.map_err(|_| AxumStatus::BAD_REQUEST)?;
        fields.push(match filename {
            Some(filename) => format!("{}={}({})", name, value, filename),
            None => format!("{}={}", name, value),
        });
    }
    Ok(fields.join("&"))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(10)).await;
    "late"
}

/// Spawn the server on an ephemeral port
pub async fn spawn_server() -> TestServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = axum::Router::new()
        .route("/hello.txt", get(hello))
        .route("/attachment", get(attachment))
        .route("/echo", post(echo))
        .route("/multipart", post(multipart_fields))
        .route("/missing", get(|| async { AxumStatus::NOT_FOUND }))
        .route("/unavailable", get(|| async { AxumStatus::SERVICE_UNAVAILABLE }))
        .route("/redirect", get(|| async { Redirect::temporary("/hello.txt") }))
        .route("/slow", get(slow))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to read local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server failed");
    });

    TestServer { addr, hits }
}

/// URL of a local port nobody listens on
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let port = listener.local_addr().expect("Failed to read port").port();
    drop(listener);
    format!("http://127.0.0.1:{}/a.txt", port)
}
