//! Deadline driven utilization control.
//!
//! An [`Interval`] models a recurring workload that has to fit in a period.
//! It tracks the load observed in each window, predicts the next one and
//! pushes the resulting utilization hint to the OS scheduling service.

// Public API
mod interval;
pub use interval::Interval;

mod perf;
pub use perf::{SCHED_CAPACITY_SHIFT, SCHED_MAX_CAPACITY, predict_util};

// Exports
mod deadline;
pub(crate) use deadline::Deadline;

mod load;
pub(crate) use load::{IntervalLoadPredictor, LoadTracker};

/// Task switch notifications fed to an [`Interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskSwitchState {
    /// A tracked task started running.
    Begin,

    /// A tracked task is still running, re-evaluate.
    Update,

    /// A tracked task stopped running.
    End,
}
