//! Progress reporting for a scraping run.
//!
//! The pagination controller reports one unit of work per attempted page.
//! Rendering (progress bar, log lines, nothing) is chosen by the caller.

use std::sync::Arc;

/// Receives page-level progress from the pagination controller.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total number of pages, once known.
    fn set_total(&self, total: u64);

    /// Advances by `delta` pages.
    fn inc(&self, delta: u64);

    /// Updates the status message (e.g. `"page 12"`).
    fn set_message(&self, msg: String);

    /// Marks the run finished with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every progress update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
