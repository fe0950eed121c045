//! Progress bar functionality.
//!
//! - `style` - Progress bar styling options and templates
//! - `display` - Coordination of the main bar and the per-transfer bars
//!
//! Bars are drawn to stderr and only when it is a terminal. Cache hits never
//! create a child bar since no bytes cross the network.
//!
//! # Examples
//!
//! ```rust
//! use fetchkeep::progress::{ProgressBarOpts, StyleOptions};
//! use fetchkeep::DownloadManagerBuilder;
//!
//! # fn example() -> Result<(), fetchkeep::Error> {
//! let manager = DownloadManagerBuilder::new()
//!     .style_options(StyleOptions::new(
//!         ProgressBarOpts::transfer(),
//!         ProgressBarOpts::hidden(),
//!     ))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod display;
pub(crate) mod style;

pub use display::ProgressDisplay;
pub use style::{ProgressBarOpts, StyleOptions};
