//! Download destinations.
//!
//! A [`Destination`] says where the bytes of a download land. When the
//! caller does not pick one, the manager resolves it: the cache when one is
//! configured, an in-memory buffer otherwise.
//!
//! # Examples
//!
//! ```rust
//! use fetchkeep::Destination;
//!
//! let dest = Destination::path("/tmp/data.csv");
//! assert!(dest.validate(false).is_ok());
//! assert!(Destination::path("relative.csv").validate(false).is_err());
//! assert!(Destination::Cache.validate(false).is_err());
//! ```

pub mod router;

pub use router::{CacheTarget, RouteError, Routed, Router};

use crate::error::{Error, Result};

use std::fmt;
use std::path::PathBuf;

/// Where fetched bytes land.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// In-memory byte sequence returned in the record.
    Buffer,
    /// Absolute filesystem location owned by the caller.
    Path(PathBuf),
    /// The configured cache store; the manager owns the key.
    Cache,
}

impl Destination {
    /// Shortcut for [`Destination::Path`].
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Destination::Path(path.into())
    }

    /// The destination used when the caller gives none.
    pub fn resolve(requested: Option<Destination>, cache_configured: bool) -> Destination {
        match requested {
            Some(destination) => destination,
            None if cache_configured => Destination::Cache,
            None => Destination::Buffer,
        }
    }

    /// Checks the destination can be honored.
    pub fn validate(&self, cache_configured: bool) -> Result<()> {
        match self {
            Destination::Buffer => Ok(()),
            Destination::Path(path) if path.as_os_str().is_empty() => {
                Err(Error::Validation("the destination path is empty".into()))
            }
            Destination::Path(path) if !path.is_absolute() => Err(Error::Validation(format!(
                "the destination path \"{}\" is not absolute",
                path.display()
            ))),
            Destination::Path(_) => Ok(()),
            Destination::Cache if !cache_configured => Err(Error::Validation(
                "the cache destination requires a configured cache".into(),
            )),
            Destination::Cache => Ok(()),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Buffer => write!(f, "buffer"),
            Destination::Path(path) => write!(f, "{}", path.display()),
            Destination::Cache => write!(f, "cache"),
        }
    }
}
