//! Progress bar display management and coordination.
//!
//! [`ProgressDisplay`] owns the `MultiProgress` of one manager call: a main bar
//! counting finished downloads for batches, and one child bar per transfer
//! sized from the announced content length. Cloning is cheap and shares the
//! same bars, so coalesced downloads report into the display of the call that
//! started them.
//!
//! # Examples
//!
//! ```rust
//! use fetchkeep::progress::{ProgressDisplay, StyleOptions};
//!
//! let display = ProgressDisplay::new(StyleOptions::default(), 3, false);
//!
//! let child = display.create_child_progress(Some(1024));
//! child.inc(512);
//! display.finish_child(child);
//!
//! display.increment_main();
//! display.finish();
//! ```

use crate::progress::StyleOptions;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget};
use std::sync::Arc;

/// Progress display manager that coordinates multiple progress bars.
#[derive(Clone)]
pub struct ProgressDisplay {
    multi: Arc<MultiProgress>,
    main: ProgressBar,
    style_options: StyleOptions,
    show_main_progress: bool,
}

impl ProgressDisplay {
    /// Create a new progress display manager.
    ///
    /// With `single_file_progress`, a display for a single download only
    /// shows the child bar.
    pub fn new(
        style_options: StyleOptions,
        total_downloads: usize,
        single_file_progress: bool,
    ) -> Self {
        let multi = match style_options.is_enabled() {
            true => Arc::new(MultiProgress::new()),
            false => Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
        };

        let show_main_progress = !single_file_progress || total_downloads > 1;

        let main = if show_main_progress {
            multi.add(style_options.main().build(Some(total_downloads as u64)))
        } else {
            ProgressBar::hidden()
        };

        if show_main_progress {
            main.tick();
        }

        Self {
            multi,
            main,
            style_options,
            show_main_progress,
        }
    }

    /// Display that draws nothing.
    pub fn hidden() -> Self {
        Self::new(StyleOptions::hidden(), 0, true)
    }

    /// The main progress bar.
    pub fn main(&self) -> &ProgressBar {
        &self.main
    }

    /// Create a child progress bar for one transfer.
    ///
    /// An unknown size gives a bar without length that only counts bytes.
    pub fn create_child_progress(&self, size: Option<u64>) -> ProgressBar {
        self.multi.add(self.style_options.child().build(size))
    }

    /// Increment the main progress bar by one.
    pub fn increment_main(&self) {
        self.main.inc(1);
    }

    /// Finish the progress display, clearing or keeping bars based on configuration.
    pub fn finish(&self) {
        if self.show_main_progress {
            if self.style_options.main().clear {
                self.main.finish_and_clear();
            } else {
                self.main.finish();
            }
        }
    }

    /// Finish a child progress bar based on configuration.
    pub fn finish_child(&self, pb: ProgressBar) {
        if self.style_options.child().clear {
            pb.finish_and_clear();
        } else {
            pb.finish();
        }
    }

    /// Drop a child bar of a transfer that failed.
    pub fn abandon_child(&self, pb: ProgressBar) {
        pb.finish_and_clear();
        self.multi.remove(&pb);
    }
}
