use crate::context::{self, EnterGuard};
use crate::error::Result;
use crate::runtime::{Builder, Handle};
use crate::task::TaskHandle;
use std::fmt;

/// The task runtime.
///
/// Owns the worker pool, the dependency graph and the ready queues. Dropping
/// the runtime shuts it down.
///
/// ```no_run
/// # fn doc() -> anyhow::Result<()> {
/// let rt = taskolo::Runtime::new()?;
///
/// let sum = rt.block_on(|| {
///     let a = taskolo::submit(|| println!("a")).unwrap();
///     taskolo::wait(&[a.token()]).unwrap();
///     1 + 1
/// });
///
/// assert_eq!(sum, 2);
/// # Ok(())
/// # }
/// ```
pub struct Runtime {
    handle: Handle,
}

impl Runtime {
    /// Builds a runtime with the default configuration.
    pub fn new() -> anyhow::Result<Runtime> {
        Builder::new().try_build()
    }

    pub(super) fn from_handle(handle: Handle) -> Runtime {
        Runtime { handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Makes this runtime the ambient one of the calling thread until the
    /// guard drops.
    pub fn enter(&self) -> EnterGuard {
        context::enter(self.handle.clone())
    }

    /// Runs `f` on the calling thread with this runtime entered, then waits
    /// for everything `f` submitted.
    pub fn block_on<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _enter = self.enter();
        let out = f();

        context::wait_group().wait();
        out
    }

    pub fn submit<F>(&self, f: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.submit(f)
    }

    /// Shuts the runtime down.
    ///
    /// Queued tasks are canceled, their tokens signaled. Running tasks are
    /// given up to the configured shutdown timeout to return.
    pub fn shutdown(self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&self) {
        if let Err(e) = self.handle.shutdown() {
            tracing::error!(error = %e, "error during runtime shutdown");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.handle.pool.num_workers())
            .field("shutdown", &self.handle.is_shutdown())
            .finish()
    }
}
