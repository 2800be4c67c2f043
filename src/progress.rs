//! Progress reporting interface
//!
//! The engine never renders anything itself. Jobs and extractions are handed an
//! `Arc<dyn ProgressReporter>` and push updates into it from the worker tasks.

use std::sync::Arc;

/// How a reporter should interpret [`ProgressReporter::report`] deltas
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressMode {
    /// The total is known; deltas are units of work (bytes) toward `max`
    Determinate,
    /// The total is unknown; the reporter should show activity only
    Indeterminate,
}

/// Sink for progress updates
///
/// Implementations must be cheap; they are called from the copy loop once per block.
pub trait ProgressReporter: Send + Sync {
    /// Reset the reporter for a new unit of work
    fn configure(&self, mode: ProgressMode, max: u64);

    /// Record `delta` additional units of completed work
    fn report(&self, delta: u64);

    /// Record that one more task of a multi-task operation finished
    fn advance_task_count(&self) {}
}

/// Reporter that discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn configure(&self, _mode: ProgressMode, _max: u64) {}

    fn report(&self, _delta: u64) {}
}

/// Shared handle to a reporter
pub type SharedProgress = Arc<dyn ProgressReporter>;

/// A [`NoProgress`] reporter behind an `Arc`
pub fn no_progress() -> SharedProgress {
    Arc::new(NoProgress)
}
