//! Request descriptors.
//!
//! A [`Descriptor`] is the immutable description of one fetch: URL, method,
//! headers, optional payload and extra query parameters. Two descriptors with
//! the same field values always derive the same cache key.
//!
//! # Examples
//!
//! ```rust
//! use fetchkeep::Descriptor;
//! use std::convert::TryFrom;
//!
//! // Plain GET, validated on construction.
//! let descriptor = Descriptor::try_from("https://example.com/data/file.csv")?;
//! assert_eq!(descriptor.url_filename().as_deref(), Some("file.csv"));
//!
//! // POST with an urlencoded form.
//! let search = Descriptor::new("https://example.com/search")
//!     .with_form([("q", "proteins"), ("limit", "10")]);
//! assert_eq!(search.method(), &reqwest::Method::POST);
//! # Ok::<(), fetchkeep::Error>(())
//! ```

use super::multipart::{self, Part};
use crate::error::{Error, Result};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderValue, IntoHeaderName, CONTENT_TYPE},
    Method, Url,
};
use serde::Serialize;
use std::convert::TryFrom;

/// Describes one download request.
///
/// Built with [`Descriptor::new`] and the consuming `with_*` methods; once
/// handed to the manager it is only ever shared behind an `Arc`. Construction
/// through `new` is not validated, the manager calls [`Descriptor::validate`]
/// before touching the network or the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    url: String,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    query: Vec<(String, String)>,
}

impl Descriptor {
    /// Creates a GET [`Descriptor`] for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            query: Vec::new(),
        }
    }

    /// Sets the HTTP method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a request header. Header names are case-insensitive.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Merges a set of request headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Appends query parameters to the URL.
    pub fn with_query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets a raw request payload.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets an `application/x-www-form-urlencoded` payload.
    ///
    /// Switches a GET descriptor to POST.
    pub fn with_form<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        if self.method == Method::GET {
            self.method = Method::POST;
        }
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.body = Some(Bytes::from(encoded));
        self
    }

    /// Sets a JSON payload.
    ///
    /// Switches a GET descriptor to POST.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(value)
            .map_err(|e| Error::Validation(format!("JSON payload cannot be encoded: {}", e)))?;
        if self.method == Method::GET {
            self.method = Method::POST;
        }
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(encoded));
        Ok(self)
    }

    /// Sets a `multipart/form-data` payload.
    ///
    /// Switches a GET descriptor to POST.
    pub fn with_multipart(mut self, parts: impl IntoIterator<Item = Part>) -> Result<Self> {
        let parts: Vec<Part> = parts.into_iter().collect();
        let (content_type, body) = multipart::encode(&parts);
        let content_type = HeaderValue::from_str(&content_type)
            .map_err(|e| Error::Validation(format!("invalid multipart content type: {}", e)))?;
        if self.method == Method::GET {
            self.method = Method::POST;
        }
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = Some(body);
        Ok(self)
    }

    /// The URL as given, without the extra query parameters.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request payload, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The extra query parameters.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// The URL the request is actually sent to, query parameters included.
    pub fn request_url(&self) -> Result<Url> {
        let mut url = parse_url(&self.url)?;
        if !self.query.is_empty() {
            let existing = url.query().unwrap_or_default().to_string();
            let query = form_urlencoded::Serializer::new(existing)
                .extend_pairs(self.query.iter())
                .finish();
            url.set_query(Some(&query));
        }
        Ok(url)
    }

    /// File name suggested by the last URL path segment.
    pub fn url_filename(&self) -> Option<String> {
        let url = Url::parse(&self.url).ok()?;
        let segment = url.path_segments()?.next_back()?;
        if segment.is_empty() {
            return None;
        }
        Some(
            form_urlencoded::parse(segment.as_bytes())
                .map(|(key, val)| [key, val].concat())
                .collect(),
        )
    }

    /// Checks the descriptor is usable for a request.
    ///
    /// The URL must be a non-empty absolute http(s) URL, and a payload is only
    /// allowed for methods that carry one.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Validation("the descriptor URL is empty".into()));
        }

        let url = self.request_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "The url \"{}\" does not use the http or https scheme",
                self.url
            )));
        }

        if self.method == Method::CONNECT {
            return Err(Error::Validation(
                "the CONNECT method cannot be used for downloads".into(),
            ));
        }

        if self.body.is_some() && !method_allows_body(&self.method) {
            return Err(Error::Validation(format!(
                "a {} request cannot carry a body",
                self.method
            )));
        }

        Ok(())
    }
}

/// Methods whose requests may carry a payload.
pub(crate) fn method_allows_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::TRACE)
}

fn parse_url(value: &str) -> Result<Url> {
    Url::parse(value)
        .map_err(|e| Error::InvalidUrl(format!("The url \"{}\" cannot be parsed: {}", value, e)))
}

impl TryFrom<&Url> for Descriptor {
    type Error = crate::error::Error;

    fn try_from(value: &Url) -> Result<Self> {
        let descriptor = Descriptor::new(value.as_str());
        descriptor.validate()?;
        Ok(descriptor)
    }
}

impl TryFrom<&str> for Descriptor {
    type Error = crate::error::Error;

    fn try_from(value: &str) -> Result<Self> {
        let descriptor = Descriptor::new(value);
        descriptor.validate()?;
        Ok(descriptor)
    }
}
