//! HTTP-library backend.
//!
//! Requests go through a `reqwest` client wrapped in `reqwest-middleware`
//! with request tracing. No retry middleware is installed: a backend performs
//! exactly one attempt per call.
//!
//! # Examples
//!
//! ## Client with Custom Configuration
//!
//! ```rust
//! use fetchkeep::backend::{create_http_client, BackendConfig};
//! use reqwest::header::{HeaderMap, ACCEPT};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut headers = HeaderMap::new();
//! headers.insert(ACCEPT, "*/*".parse()?);
//!
//! let config = BackendConfig {
//!     connect_timeout: Duration::from_secs(5),
//!     headers: Some(headers),
//!     ..BackendConfig::default()
//! };
//!
//! let client = create_http_client(&config)?;
//! # Ok(())
//! # }
//! ```

use super::{Backend, BackendConfig, BackendResponse, MAX_REDIRECTS};
use crate::download::Descriptor;
use crate::error::{FailureKind, FetchFailure};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{redirect::Policy, Proxy};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::Retryable;
use reqwest_tracing::TracingMiddleware;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

/// Creates an HTTP client from the backend settings.
///
/// The client carries the tracing middleware so every request shows up as a
/// span. The per-request timeout is set by [`ReqwestBackend::fetch`].
pub fn create_http_client(config: &BackendConfig) -> Result<ClientWithMiddleware, reqwest::Error> {
    let redirect = if config.follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    let mut inner_client_builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .redirect(redirect)
        .user_agent(config.user_agent.as_str());

    #[cfg(any(feature = "default", feature = "rustls"))]
    {
        inner_client_builder =
            inner_client_builder.danger_accept_invalid_certs(!config.verify_tls);
    }

    if let Some(proxy) = &config.proxy {
        inner_client_builder = inner_client_builder.proxy(Proxy::all(proxy.as_str())?);
    }

    if let Some(headers) = &config.headers {
        inner_client_builder = inner_client_builder.default_headers(headers.clone());
    }

    let inner_client = inner_client_builder.build()?;

    let client = ClientBuilder::new(inner_client)
        // Trace HTTP requests. See the tracing crate to make use of these traces.
        .with(TracingMiddleware::default())
        .build();

    Ok(client)
}

/// Backend built on `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: ClientWithMiddleware,
}

impl ReqwestBackend {
    /// Build the backend and its client.
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: create_http_client(config)?,
        })
    }
}

#[async_trait]
impl Backend for ReqwestBackend {
    fn name(&self) -> &str {
        "reqwest"
    }

    async fn fetch(
        &self,
        descriptor: &Descriptor,
        timeout: Duration,
    ) -> Result<BackendResponse, FetchFailure> {
        let url = descriptor
            .request_url()
            .map_err(|e| FetchFailure::new(FailureKind::MalformedUrl, e.to_string()))?;
        debug!(method = %descriptor.method(), url = %url, "Sending request");

        let mut request = self
            .client
            .request(descriptor.method().clone(), url)
            .headers(descriptor.headers().clone())
            .timeout(timeout);
        if let Some(body) = descriptor.body() {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(classify_request_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| classify_body_error(&e)))
            .boxed();

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

/// Classify a failure that happened before a response arrived.
fn classify_request_error(error: reqwest_middleware::Error) -> FetchFailure {
    let message = error_chain(&error);
    let kind = match &error {
        reqwest_middleware::Error::Reqwest(e) => classify_reqwest_error(e),
        reqwest_middleware::Error::Middleware(_) => None,
    }
    .unwrap_or_else(|| match reqwest_retry::default_on_request_failure(&error) {
        Some(Retryable::Transient) => FailureKind::ConnectionReset,
        _ => FailureKind::Other,
    });
    FetchFailure::new(kind, message)
}

/// Classify a failure of the body stream.
fn classify_body_error(error: &reqwest::Error) -> FetchFailure {
    let message = error_chain(error);
    let kind = classify_reqwest_error(error).unwrap_or(FailureKind::ConnectionReset);
    FetchFailure::new(kind, message)
}

fn classify_reqwest_error(error: &reqwest::Error) -> Option<FailureKind> {
    // Only the sources: the top-level message embeds the URL.
    let lowered = error
        .source()
        .map(error_chain)
        .unwrap_or_default()
        .to_ascii_lowercase();

    if error.is_builder() {
        Some(FailureKind::MalformedUrl)
    } else if error.is_timeout() {
        Some(FailureKind::Timeout)
    } else if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
        Some(FailureKind::Dns)
    } else if lowered.contains("certificate")
        || lowered.contains("tls")
        || lowered.contains("ssl")
        || lowered.contains("handshake")
    {
        Some(FailureKind::Tls)
    } else if error.is_connect() {
        Some(FailureKind::Connect)
    } else if error.is_redirect() {
        Some(FailureKind::Other)
    } else if error.is_body() || error.is_decode() {
        Some(FailureKind::ConnectionReset)
    } else {
        None
    }
}

/// The error message followed by all of its sources.
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}
