//! Freshness of cached entries.
//!
//! Compares the headers of a `HEAD` response with the metadata stored next
//! to a cache entry, to tell whether the remote resource changed since it was
//! downloaded. Nothing here touches the network; see
//! [`DownloadManager::revalidate`](crate::DownloadManager::revalidate) for the
//! operation sending the `HEAD` request.
//!
//! # Examples
//!
//! ```rust
//! use fetchkeep::cache::CacheMetadata;
//! use fetchkeep::freshness::{check_freshness, FreshnessMethod};
//! use reqwest::header::{HeaderMap, HeaderValue, ETAG};
//!
//! let stored = CacheMetadata {
//!     etag: Some("\"v1\"".into()),
//!     ..CacheMetadata::default()
//! };
//! let mut remote = HeaderMap::new();
//! remote.insert(ETAG, HeaderValue::from_static("\"v2\""));
//!
//! let freshness = check_freshness(&remote, &stored, FreshnessMethod::Auto);
//! assert!(!freshness.current);
//! assert_eq!(freshness.reason, "etag: etag mismatch");
//! ```

use crate::cache::CacheMetadata;
use crate::utils::headers::content_length;

use chrono::DateTime;
use reqwest::header::{AsHeaderName, HeaderMap, ETAG, LAST_MODIFIED};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How to decide whether an entry is current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FreshnessMethod {
    /// ETag, then Last-Modified, then size: the first one available decides.
    #[default]
    Auto,
    /// Compare entity tags.
    Etag,
    /// Compare Last-Modified dates.
    Modified,
    /// Compare the Content-MD5 digests.
    Hash,
    /// Compare Content-Length with the stored size.
    Size,
}

impl fmt::Display for FreshnessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FreshnessMethod::Auto => "auto",
            FreshnessMethod::Etag => "etag",
            FreshnessMethod::Modified => "modified",
            FreshnessMethod::Hash => "hash",
            FreshnessMethod::Size => "size",
        };
        f.write_str(name)
    }
}

impl FromStr for FreshnessMethod {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(FreshnessMethod::Auto),
            "etag" => Ok(FreshnessMethod::Etag),
            "modified" | "last-modified" => Ok(FreshnessMethod::Modified),
            "hash" | "md5" => Ok(FreshnessMethod::Hash),
            "size" => Ok(FreshnessMethod::Size),
            other => Err(crate::error::Error::Validation(format!(
                "unknown freshness method \"{}\"",
                other
            ))),
        }
    }
}

/// Verdict of a freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    /// Whether the stored entry still matches the remote resource.
    pub current: bool,
    /// Human readable explanation.
    pub reason: String,
}

impl Freshness {
    fn new(current: bool, reason: impl Into<String>) -> Self {
        Self {
            current,
            reason: reason.into(),
        }
    }
}

/// `None` when the remote headers do not support the method.
type Check = Option<Freshness>;

/// Decide whether `stored` is still current given the remote `headers`.
pub fn check_freshness(
    headers: &HeaderMap,
    stored: &CacheMetadata,
    method: FreshnessMethod,
) -> Freshness {
    if method != FreshnessMethod::Auto {
        return check_by(headers, stored, method)
            .unwrap_or_else(|| Freshness::new(false, format!("{}: method unavailable", method)));
    }

    for method in [
        FreshnessMethod::Etag,
        FreshnessMethod::Modified,
        FreshnessMethod::Size,
    ] {
        if let Some(freshness) = check_by(headers, stored, method) {
            return Freshness::new(
                freshness.current,
                format!("{}: {}", method, freshness.reason),
            );
        }
    }
    Freshness::new(false, "no check method available")
}

fn check_by(headers: &HeaderMap, stored: &CacheMetadata, method: FreshnessMethod) -> Check {
    match method {
        FreshnessMethod::Etag => check_etag(headers, stored),
        FreshnessMethod::Modified => check_last_modified(headers, stored),
        FreshnessMethod::Hash => check_md5(headers, stored),
        FreshnessMethod::Size => check_size(headers, stored),
        FreshnessMethod::Auto => None,
    }
}

fn header_str<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn check_etag(headers: &HeaderMap, stored: &CacheMetadata) -> Check {
    let remote = header_str(headers, ETAG)?;
    let Some(local) = stored.etag.as_deref() else {
        return Some(Freshness::new(false, "no local etag stored"));
    };
    let current = remote == local;
    debug!(remote, local, current, "ETag check");
    Some(Freshness::new(
        current,
        if current { "etag match" } else { "etag mismatch" },
    ))
}

fn check_last_modified(headers: &HeaderMap, stored: &CacheMetadata) -> Check {
    let remote = header_str(headers, LAST_MODIFIED)?;
    let Some(local) = stored.last_modified.as_deref() else {
        return Some(Freshness::new(false, "no local last-modified stored"));
    };

    let parsed = DateTime::parse_from_rfc2822(remote)
        .and_then(|remote| DateTime::parse_from_rfc2822(local).map(|local| (remote, local)));
    Some(match parsed {
        Ok((remote, local)) => {
            let current = local >= remote;
            debug!(%remote, %local, current, "Last-Modified check");
            Freshness::new(current, if current { "not modified" } else { "modified" })
        }
        Err(e) => Freshness::new(false, format!("date parse error: {}", e)),
    })
}

fn check_md5(headers: &HeaderMap, stored: &CacheMetadata) -> Check {
    let remote = header_str(headers, "content-md5")?;
    let Some(local) = stored.content_md5.as_deref() else {
        return Some(Freshness::new(false, "no local content-md5 stored"));
    };
    let current = remote == local;
    Some(Freshness::new(
        current,
        if current { "md5 match" } else { "md5 mismatch" },
    ))
}

fn check_size(headers: &HeaderMap, stored: &CacheMetadata) -> Check {
    let remote = content_length(headers)?;
    let current = remote == stored.size;
    debug!(remote, local = stored.size, current, "Size check");
    Some(Freshness::new(
        current,
        if current { "size match" } else { "size mismatch" },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_LENGTH};

    fn stored() -> CacheMetadata {
        CacheMetadata {
            etag: Some("\"abc\"".into()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".into()),
            content_md5: Some("Q2hlY2sgSW50ZWdyaXR5IQ==".into()),
            size: 5,
            ..CacheMetadata::default()
        }
    }

    fn remote(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn test_etag_decides_first() {
        let headers = remote(&[("etag", "\"abc\""), ("content-length", "999")]);
        let freshness = check_freshness(&headers, &stored(), FreshnessMethod::Auto);
        assert!(freshness.current);
        assert_eq!(freshness.reason, "etag: etag match");
    }

    #[test]
    fn test_falls_back_to_last_modified() {
        let headers = remote(&[("last-modified", "Tue, 20 Oct 2015 07:28:00 GMT")]);
        let freshness = check_freshness(&headers, &stored(), FreshnessMethod::Auto);
        assert!(freshness.current);
        assert_eq!(freshness.reason, "modified: not modified");

        let headers = remote(&[("last-modified", "Thu, 22 Oct 2015 07:28:00 GMT")]);
        assert!(!check_freshness(&headers, &stored(), FreshnessMethod::Auto).current);
    }

    #[test]
    fn test_falls_back_to_size() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        let freshness = check_freshness(&headers, &stored(), FreshnessMethod::Auto);
        assert!(freshness.current);
        assert_eq!(freshness.reason, "size: size match");
    }

    #[test]
    fn test_nothing_to_compare() {
        let freshness = check_freshness(&HeaderMap::new(), &stored(), FreshnessMethod::Auto);
        assert!(!freshness.current);
        assert_eq!(freshness.reason, "no check method available");
    }

    #[test]
    fn test_missing_local_etag() {
        let headers = remote(&[("etag", "\"abc\"")]);
        let freshness = check_freshness(
            &headers,
            &CacheMetadata::default(),
            FreshnessMethod::Etag,
        );
        assert!(!freshness.current);
        assert_eq!(freshness.reason, "no local etag stored");
    }

    #[test]
    fn test_md5() {
        let headers = remote(&[("content-md5", "Q2hlY2sgSW50ZWdyaXR5IQ==")]);
        assert!(check_freshness(&headers, &stored(), FreshnessMethod::Hash).current);
        assert!(!check_freshness(&HeaderMap::new(), &stored(), FreshnessMethod::Hash).current);
    }

    #[test]
    fn test_unparsable_date() {
        let headers = remote(&[("last-modified", "yesterday")]);
        let freshness = check_freshness(&headers, &stored(), FreshnessMethod::Modified);
        assert!(!freshness.current);
        assert!(freshness.reason.starts_with("date parse error"));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("ETag".parse::<FreshnessMethod>().unwrap(), FreshnessMethod::Etag);
        assert_eq!("auto".parse::<FreshnessMethod>().unwrap(), FreshnessMethod::Auto);
        assert!("crc".parse::<FreshnessMethod>().is_err());
    }
}
