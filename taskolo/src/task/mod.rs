use crate::context;
use crate::error::{Error, Result};
use crate::qos::Qos;
use crate::sys;

// Public API
mod attr;
pub use self::attr::TaskAttr;

mod handle;
pub use self::handle::TaskHandle;

pub mod id;
pub use self::id::Id;

mod state;
pub use self::state::State;

pub(crate) mod task;
pub(crate) use self::task::{Notified, Payload, Task, TaskBuilder, TaskGuard};

/// Returns the [`Id`] of the currently running task.
///
/// # Panics
///
/// This function panics if called from outside a task. For a version of this
/// function that doesn't panic, see [`task::try_id()`](crate::task::try_id()).
#[track_caller]
pub fn id() -> Id {
    context::current_task_id().expect("Can't get a task id when not inside a task")
}

/// Returns the [`Id`] of the currently running task, or `None` if called outside
/// of a task.
pub fn try_id() -> Option<Id> {
    context::current_task_id()
}

/// Moves the currently running task to another priority class.
///
/// The OS scheduling attributes of the calling thread follow for the rest of
/// the payload. The worker restores its own class once the task returns.
pub fn update_qos(qos: Qos) -> Result<()> {
    let task = context::current_task().ok_or(Error::NotInTask)?;
    if task.qos() == qos {
        return Ok(());
    }

    let handle = context::current()?;
    tracing::debug!(id = %task.id(), from = %task.qos(), to = %qos, "update task qos");

    task.set_qos(qos);
    sys::log_failure("apply_qos", handle.cfg.qos_service.apply_qos(qos));

    Ok(())
}

/// Labels the running task in trace output.
pub fn set_trace_tag(tag: impl Into<String>) -> Result<()> {
    let task = context::current_task().ok_or(Error::NotInTask)?;
    task.set_trace_tag(Some(tag.into()));
    Ok(())
}

pub fn clear_trace_tag() -> Result<()> {
    let task = context::current_task().ok_or(Error::NotInTask)?;
    task.set_trace_tag(None);
    Ok(())
}

pub fn trace_tag() -> Option<String> {
    context::current_task().and_then(|task| task.trace_tag())
}
