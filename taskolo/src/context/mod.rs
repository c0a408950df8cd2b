//! Thread-local runtime context.
//!
//! Tracks which runtime the calling thread submits to, which task it is
//! running and, on workers, which priority class it serves.
use crate::deps::WaitGroup;
use crate::error::{Error, Result};
use crate::qos::Qos;
use crate::runtime::Handle;
use crate::task::{Id, Task};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread_local;

struct Context {
    /// Runtime entered on this thread.
    handle: RefCell<Option<Handle>>,

    /// Task whose payload is running on this thread.
    task: RefCell<Option<Task>>,

    /// Class served by this thread, if it is a worker.
    worker: Cell<Option<Qos>>,

    /// Outstanding work submitted from this thread outside of any task.
    root_group: Arc<WaitGroup>,
}

thread_local! {
    static CONTEXT: Context = Context {
        handle: RefCell::new(None),
        task: RefCell::new(None),
        worker: Cell::new(None),
        root_group: Arc::new(WaitGroup::new()),
    };
}

/// Returns the runtime entered on this thread.
pub(crate) fn current() -> Result<Handle> {
    try_current().ok_or(Error::NoRuntime)
}

pub(crate) fn try_current() -> Option<Handle> {
    CONTEXT.with(|ctx| ctx.handle.borrow().clone())
}

/// Returns true if `handle` is the runtime entered on this thread.
pub(crate) fn is_current(handle: &Handle) -> bool {
    CONTEXT.with(|ctx| {
        ctx.handle
            .borrow()
            .as_ref()
            .is_some_and(|current| current.ptr_eq(handle))
    })
}

/// Guard returned by [`Runtime::enter`](crate::Runtime::enter). Restores the
/// previously entered runtime, if any, on drop.
#[must_use = "the runtime is only entered while the guard is alive"]
pub struct EnterGuard {
    prev: Option<Handle>,

    // Bound to the thread it was created on.
    _not_send: PhantomData<*const ()>,
}

pub(crate) fn enter(handle: Handle) -> EnterGuard {
    let prev = CONTEXT.with(|ctx| ctx.handle.replace(Some(handle)));

    EnterGuard {
        prev,
        _not_send: PhantomData,
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        let current = CONTEXT.with(|ctx| ctx.handle.replace(prev));
        drop(current);
    }
}

pub(crate) struct WorkerGuard {
    _not_send: PhantomData<*const ()>,
}

/// Marks this thread as a worker of class `qos` until the guard drops.
pub(crate) fn enter_worker(qos: Qos) -> WorkerGuard {
    CONTEXT.with(|ctx| {
        debug_assert!(ctx.worker.get().is_none(), "thread is already a worker");
        ctx.worker.set(Some(qos));
    });

    WorkerGuard {
        _not_send: PhantomData,
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        CONTEXT.with(|ctx| ctx.worker.set(None));
    }
}

pub(crate) fn current_worker() -> Option<Qos> {
    CONTEXT.with(|ctx| ctx.worker.get())
}

pub(crate) fn current_task() -> Option<Task> {
    CONTEXT.with(|ctx| ctx.task.borrow().clone())
}

pub(crate) fn current_task_id() -> Option<Id> {
    CONTEXT.with(|ctx| ctx.task.borrow().as_ref().map(Task::id))
}

/// Installs `task` as the running task, returning the previous one.
pub(crate) fn set_current_task(task: Option<Task>) -> Option<Task> {
    CONTEXT.with(|ctx| ctx.task.replace(task))
}

/// Outstanding-work counter of the calling context: the running task's
/// children, or the thread's own counter outside of tasks.
pub(crate) fn wait_group() -> Arc<WaitGroup> {
    CONTEXT.with(|ctx| match &*ctx.task.borrow() {
        Some(task) => Arc::clone(task.children()),
        None => Arc::clone(&ctx.root_group),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Builder;
    use crate::task::TaskGuard;
    use crate::test_utils::*;
    use anyhow::Result;
    use static_assertions::assert_not_impl_any;

    assert_not_impl_any!(EnterGuard: Send, Sync);

    #[test]
    fn test_no_runtime_outside_enter() {
        assert!(matches!(current(), Err(Error::NoRuntime)));
        assert!(current_worker().is_none());
    }

    #[test]
    fn test_enter_nests_and_restores() -> Result<()> {
        let outer = Builder::new().max_workers(1).try_build()?;
        let inner = Builder::new().max_workers(1).try_build()?;

        {
            let _outer = outer.enter();
            assert!(is_current(outer.handle()));
            {
                let _inner = inner.enter();
                assert!(is_current(inner.handle()));
                assert!(!is_current(outer.handle()));
            }
            assert!(is_current(outer.handle()));
        }

        assert!(try_current().is_none());
        Ok(())
    }

    #[test]
    fn test_wait_group_follows_current_task() {
        let root = wait_group();
        let task = mock_task(Box::new(|| {}));

        {
            let _guard = TaskGuard::enter(task.clone());
            assert!(Arc::ptr_eq(&wait_group(), task.children()));
        }

        assert!(Arc::ptr_eq(&wait_group(), &root));
    }

    #[test]
    fn test_worker_marker_is_scoped() {
        {
            let _worker = enter_worker(Qos::Utility);
            assert_eq!(current_worker(), Some(Qos::Utility));
        }
        assert!(current_worker().is_none());
    }
}
