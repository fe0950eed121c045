//! Response header helpers.
//!
//! Content size, server suggested file names and the flattening of a
//! [`HeaderMap`] into the sorted map stored in records and cache metadata.

use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE};
use std::collections::BTreeMap;

/// Size of the content announced by the response headers.
///
/// A `Content-Range` total wins over `Content-Length`, since a ranged
/// response announces the full size there.
///
/// # Example
///
/// ```rust
/// use fetchkeep::utils::content_length;
/// use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH};
///
/// let mut headers = HeaderMap::new();
/// headers.insert(CONTENT_LENGTH, HeaderValue::from_static("2048"));
/// assert_eq!(content_length(&headers), Some(2048));
/// ```
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    if let Some(total) = headers
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_range_total)
    {
        return Some(total);
    }

    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Parse the total size out of a `Content-Range` value.
///
/// ```rust
/// use fetchkeep::utils::parse_content_range_total;
///
/// assert_eq!(parse_content_range_total("bytes 0-1023/2048"), Some(2048));
/// assert_eq!(parse_content_range_total("bytes 0-1023/*"), None);
/// ```
pub fn parse_content_range_total(content_range: &str) -> Option<u64> {
    content_range
        .split('/')
        .nth(1)
        .and_then(|size| size.trim().parse::<u64>().ok())
}

/// File name announced in a `Content-Disposition` header.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|part| {
        let (key, raw) = part.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = raw.trim().trim_matches('"');
        // Never let a server walk out of the target directory.
        let name = name.rsplit(['/', '\\']).next()?;
        if name.is_empty() || name == "." || name == ".." {
            None
        } else {
            Some(name.to_string())
        }
    })
}

/// File name from already flattened response headers.
pub fn filename_from_headers(headers: &BTreeMap<String, String>) -> Option<String> {
    headers
        .get(CONTENT_DISPOSITION.as_str())
        .and_then(|value| filename_from_disposition(value))
}

/// Flatten a header map into lowercase name to value pairs.
///
/// Repeated headers are joined with `", "`; values that are not visible ASCII
/// are decoded lossily.
pub fn header_map_to_btree(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    flat
}
