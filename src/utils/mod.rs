//! Shared utility functions.
//!
//! # Overview
//!
//! - [`headers`] - Content size, file names and header flattening
//! - [`staged`] - Temporary files renamed into place once complete
//!
//! # Examples
//!
//! ```rust
//! use fetchkeep::utils::filename_from_disposition;
//!
//! let name = filename_from_disposition("attachment; filename=\"report.csv\"");
//! assert_eq!(name.as_deref(), Some("report.csv"));
//! ```

pub mod headers;
pub mod staged;

pub use headers::{
    content_length, filename_from_disposition, filename_from_headers, header_map_to_btree,
    parse_content_range_total,
};
pub use staged::StagedFile;
