use crate::task::Id;
use std::io;
use std::time::Duration;

/// Errors reported by the runtime to its callers.
///
/// Caller mistakes and contention are reported here. Broken internal
/// invariants (e.g. a dependency counter underflow) panic instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Task {0} has already started")]
    AlreadyStarted(Id),

    #[error("Item is no longer queued")]
    NotQueued,

    #[error("Interval is already active")]
    IntervalActive,

    #[error("Scheduling service reported busy")]
    Busy,

    #[error("Watchdog deadline is too close to arm, only {0:?} left")]
    WatchdogTooShort(Duration),

    #[error("Runtime is shutting down")]
    ShuttingDown,

    #[error("Not running inside a task")]
    NotInTask,

    #[error("No runtime entered on this thread")]
    NoRuntime,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// OS error code, for errors reported by the scheduling service.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidArgument(a), Self::InvalidArgument(b)) => a == b,
            (Self::AlreadyStarted(a), Self::AlreadyStarted(b)) => a == b,
            (Self::NotQueued, Self::NotQueued) => true,
            (Self::IntervalActive, Self::IntervalActive) => true,
            (Self::Busy, Self::Busy) => true,
            (Self::WatchdogTooShort(a), Self::WatchdogTooShort(b)) => a == b,
            (Self::ShuttingDown, Self::ShuttingDown) => true,
            (Self::NotInTask, Self::NotInTask) => true,
            (Self::NoRuntime, Self::NoRuntime) => true,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}
