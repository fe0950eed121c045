//! Download module containing the request and provenance types.
//!
//! This module describes what is asked of the manager and what it reports
//! back. A [`Descriptor`] goes in, a [`DownloadRecord`] comes out, and the
//! [`recorder`] is the single place where records are assembled.
//!
//! # Overview
//!
//! - [`descriptor`] - Immutable request description and its validation
//! - [`record`] - Download records, statuses and artifacts
//! - [`recorder`] - Pure construction of records from download outcomes
//! - [`multipart`] - `multipart/form-data` parts and their encoding
//! - [`hash`] - SHA-256 hashing while the bytes stream to their destination
//!
//! # Examples
//!
//! ```rust
//! use fetchkeep::download::Descriptor;
//! use reqwest::{header::HeaderValue, Method};
//!
//! let descriptor = Descriptor::new("https://example.com/api/items")
//!     .with_method(Method::PUT)
//!     .with_header("x-api-key", HeaderValue::from_static("secret"))
//!     .with_body(r#"{"name":"item"}"#);
//! assert!(descriptor.validate().is_ok());
//! ```

pub mod descriptor;
pub mod hash;
pub mod multipart;
pub mod record;
pub mod recorder;

pub use descriptor::Descriptor;
pub use hash::{sha256_hex, ContentDigest, HashingStream};
pub use multipart::Part;
pub use record::{Artifact, DownloadRecord, Status};
pub use recorder::{record, Outcome, Timestamps};
