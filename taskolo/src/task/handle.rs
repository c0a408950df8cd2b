use crate::deps::Token;
use crate::error::{Error, Result};
use crate::qos::Qos;
use crate::runtime::Handle;
use crate::task::{Id, State, Task};
use std::fmt;

/// An owned permission to wait on or skip a submitted task.
///
/// Dropping the handle detaches the task, it still runs. The handle's
/// [`token`](TaskHandle::token) can be used as an input dependency of other
/// tasks, or passed to [`wait`](crate::wait).
///
/// ```no_run
/// # fn doc() -> anyhow::Result<()> {
/// let rt = taskolo::Runtime::new()?;
/// let first = rt.submit(|| println!("first"))?;
/// let second = rt.handle().submit_with(
///     || println!("second"),
///     &[first.token()],
///     &[],
///     Default::default(),
/// )?;
/// second.wait()?;
/// # Ok(())
/// # }
/// ```
pub struct TaskHandle {
    task: Task,
    scheduler: Handle,
}

impl TaskHandle {
    pub(crate) fn new(task: Task, scheduler: Handle) -> TaskHandle {
        TaskHandle { task, scheduler }
    }

    pub fn id(&self) -> Id {
        self.task.id()
    }

    /// Token signaled once the task completed, was skipped or canceled.
    pub fn token(&self) -> Token {
        self.task.token()
    }

    pub fn qos(&self) -> Qos {
        self.task.qos()
    }

    pub fn name(&self) -> Option<&str> {
        self.task.name()
    }

    pub fn state(&self) -> State {
        self.task.state()
    }

    /// Returns true once the task reached a terminal state.
    ///
    /// Its output tokens are released right after, so dependents may not be
    /// runnable yet. [`wait`](TaskHandle::wait) returns once they are released.
    pub fn is_finished(&self) -> bool {
        self.task.is_done()
    }

    /// Blocks until the task completed.
    pub fn wait(&self) -> Result<()> {
        self.scheduler.wait(&[self.token()])
    }

    /// Prevents the payload from ever running, if no worker picked it up yet.
    /// The task's output tokens are still signaled so dependents make
    /// progress.
    pub fn skip(&self) -> Result<()> {
        match self.task.skip() {
            Ok(()) => {
                drop(self.task.take_payload());
                tracing::debug!(id = %self.id(), "task skipped");
                Ok(())
            }
            Err(state) => {
                tracing::debug!(id = %self.id(), %state, "task can't be skipped");
                Err(Error::AlreadyStarted(self.id()))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn task(&self) -> &Task {
        &self.task
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
