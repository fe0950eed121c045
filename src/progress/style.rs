//! Progress bar looks.
//!
//! A batch shows one counter bar (downloads finished out of the batch size)
//! above one byte bar per transfer. Transfers of unknown size get a spinner
//! counting bytes instead.
//!
//! ```rust
//! use fetchkeep::progress::{ProgressBarOpts, StyleOptions};
//!
//! let style = StyleOptions::new(
//!     ProgressBarOpts::counter().template("{pos}/{len} {wide_bar}"),
//!     ProgressBarOpts::transfer().clear_on_finish(false),
//! );
//! assert!(style.is_enabled());
//! assert!(!StyleOptions::hidden().is_enabled());
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

const COUNTER_TEMPLATE: &str = "{bar:40.blue} {pos:>}/{len} ({percent}%) eta {eta_precise:.blue}";
const TRANSFER_TEMPLATE: &str =
    "{bar:40.green/black} {bytes:>11.green}/{total_bytes:<11.green} {bytes_per_sec:>13.red} eta {eta:.blue}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {bytes:>11.green} {bytes_per_sec:>13.red}";
const BLOCK_CHARS: &str = "█▉▊▋▌▍▎▏  ";
const LINE_CHARS: &str = "━╾╴─";

/// Looks of the batch counter bar and of the per-transfer bars.
///
/// The counter stays on screen once the batch is done, transfer bars are
/// cleared as each transfer ends.
#[derive(Debug, Clone)]
pub struct StyleOptions {
    pub(crate) main: ProgressBarOpts,
    pub(crate) child: ProgressBarOpts,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self::new(ProgressBarOpts::counter(), ProgressBarOpts::transfer())
    }
}

impl StyleOptions {
    pub fn new(main: ProgressBarOpts, child: ProgressBarOpts) -> Self {
        Self { main, child }
    }

    /// Nothing is drawn.
    pub fn hidden() -> Self {
        Self::new(ProgressBarOpts::hidden(), ProgressBarOpts::hidden())
    }

    /// Whether any bar is drawn at all.
    pub fn is_enabled(&self) -> bool {
        self.main.enabled || self.child.enabled
    }

    pub(crate) fn main(&self) -> &ProgressBarOpts {
        &self.main
    }

    pub(crate) fn child(&self) -> &ProgressBarOpts {
        &self.child
    }
}

/// Looks of one kind of bar.
#[derive(Debug, Clone)]
pub struct ProgressBarOpts {
    template: Option<String>,
    /// At least three characters: done, current and remaining.
    chars: Option<String>,
    pub(crate) enabled: bool,
    pub(crate) clear: bool,
}

impl Default for ProgressBarOpts {
    /// The plain `indicatif` bar, cleared when finished.
    fn default() -> Self {
        Self {
            template: None,
            chars: None,
            enabled: true,
            clear: true,
        }
    }
}

impl ProgressBarOpts {
    /// `████████████████████ 11/12 (91%) eta 00:00:02`, kept when finished.
    pub fn counter() -> Self {
        Self {
            template: Some(COUNTER_TEMPLATE.into()),
            chars: Some(BLOCK_CHARS.into()),
            enabled: true,
            clear: false,
        }
    }

    /// `━━━━━━━━━━╾─── 211.23 KiB/400.00 KiB 1008.31 KiB/s eta 0s`, cleared when finished.
    pub fn transfer() -> Self {
        Self {
            template: Some(TRANSFER_TEMPLATE.into()),
            chars: Some(LINE_CHARS.into()),
            enabled: true,
            clear: true,
        }
    }

    pub fn hidden() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Replace the `indicatif` template.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Replace the progress characters.
    pub fn chars(mut self, chars: impl Into<String>) -> Self {
        self.chars = Some(chars.into());
        self
    }

    pub fn clear_on_finish(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// A bar of `len` steps, or a byte-counting spinner when `len` is unknown.
    pub(crate) fn build(&self, len: Option<u64>) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }
        match len {
            Some(len) => ProgressBar::new(len).with_style(self.bar_style()),
            None => ProgressBar::new_spinner().with_style(
                ProgressStyle::with_template(SPINNER_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            ),
        }
    }

    fn bar_style(&self) -> ProgressStyle {
        let mut style = ProgressStyle::default_bar();
        if let Some(template) = &self.template {
            match ProgressStyle::with_template(template) {
                Ok(custom) => style = custom,
                Err(e) => warn!(template = %template, error = %e, "Invalid progress template"),
            }
        }
        if let Some(chars) = &self.chars {
            style = style.progress_chars(chars);
        }
        style
    }
}
