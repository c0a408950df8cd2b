use crate::task::Notified;
use bitflags::bitflags;

// Public API
pub mod builder;
pub use builder::Builder;

pub mod runtime;
pub use runtime::Runtime;

pub use crate::context::EnterGuard;

mod scheduler;
pub use scheduler::Handle;
pub(crate) use scheduler::Scheduler;

mod spawn;
pub use spawn::{skip, submit, submit_with, wait, wait_all};

// Exports
pub(crate) use builder::RuntimeConfig;

pub(crate) mod pool;
pub(crate) use pool::TaskNotify;

mod ready;
pub(crate) use ready::ReadyQueues;

pub(crate) mod timer;
pub(crate) use timer::Timer;

/// Receives tasks whose dependencies are all satisfied.
pub(crate) trait Schedule: Send + Sync + 'static {
    /// Enqueue a ready task to the queue of its priority class.
    fn schedule(&self, task: Notified);
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub(crate) struct TaskOpts: u16 {
        /// Not tracked by the submitter's `wait_all`.
        const DETACHED = 1;
    }
}
