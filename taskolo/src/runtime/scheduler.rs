use crate::context;
use crate::deps::DependencyGraph;
use crate::qos::Qos;
use crate::runtime::pool::ThreadPool;
use crate::runtime::{ReadyQueues, RuntimeConfig, Schedule, TaskNotify, Timer};
use crate::task::{Notified, Task};
use crate::utils::ScopeGuard;
use anyhow::Context as _;
use std::cell::Cell;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

thread_local! {
    /// Set while this thread drains the ready queues during teardown.
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Shared runtime state behind a [`Handle`].
#[doc(hidden)]
#[derive(Debug)]
pub struct Scheduler {
    pub(crate) cfg: RuntimeConfig,

    pub(crate) graph: DependencyGraph,

    pub(crate) queues: ReadyQueues,

    pub(crate) pool: ThreadPool,

    /// Drives delayed submissions and serial queue watchdogs.
    pub(crate) timer: Timer,

    shutdown: AtomicBool,
}

impl Scheduler {
    pub(crate) fn try_new(cfg: RuntimeConfig) -> anyhow::Result<Self> {
        let timer = Timer::start("taskolo-timer".to_owned(), cfg.timer_slack)
            .context("failed to start the timer thread")?;

        Ok(Self {
            pool: ThreadPool::new(&cfg),
            graph: DependencyGraph::new(),
            queues: ReadyQueues::new(),
            timer,
            shutdown: AtomicBool::new(false),
            cfg,
        })
    }

    pub(crate) fn into_handle(self) -> Handle {
        Handle(Arc::new(self))
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Pops the next task of a class. Always `None` once teardown started.
    pub(crate) fn pick_next_task(&self, qos: Qos) -> Option<Notified> {
        if self.is_shutdown() {
            return None;
        }

        self.queues.pick_next(qos)
    }
}

/// A cloneable reference to a running [`Runtime`](crate::Runtime).
///
/// Handles keep the scheduler state alive, not the workers: once the runtime
/// is shut down every submission through a handle fails with
/// [`Error::ShuttingDown`](crate::Error::ShuttingDown).
#[derive(Debug, Clone)]
pub struct Handle(Arc<Scheduler>);

impl Schedule for Handle {
    fn schedule(&self, task: Notified) {
        let qos = task.qos();
        self.queues.push(task);

        if !self.is_shutdown() {
            self.notify(qos, TaskNotify::Added);
        } else if !DRAINING.get() {
            // No worker will ever pick it up.
            self.cancel_queued();
        }
    }
}

impl Handle {
    pub(crate) fn ptr_eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Terminal bookkeeping shared by every exit path of a task: it is marked
    /// done, its out tokens are signaled and the submitter's wait group
    /// released, in that order. Whoever returns from a wait on the task's
    /// tokens observes it finished.
    pub(crate) fn complete(&self, task: &Task) {
        task.mark_done();
        self.graph.signal(task.id(), task.outs(), self);
        task.release_parent();
    }

    /// Cancels every queued task without running it. Consumers promoted in
    /// the process land in the queues and are canceled by the same loop.
    fn cancel_queued(&self) -> usize {
        DRAINING.set(true);
        let _reset = ScopeGuard::new(|| DRAINING.set(false));

        let mut canceled = 0;
        while let Some(task) = self.queues.pick_any() {
            let task = task.into_task();

            if task.cancel() {
                canceled += 1;
            }

            drop(task.take_payload());
            self.complete(&task);
        }

        canceled
    }

    /// Runs `f`, accounting the calling worker as blocked so its class keeps
    /// draining in the meantime. Outside of this runtime's workers `f` just
    /// runs.
    pub(crate) fn block_in_place<R>(&self, f: impl FnOnce() -> R) -> R {
        match context::current_worker() {
            Some(qos) if context::is_current(self) => {
                let _blocked = self.pool.group(qos).enter_blocking(self);
                f()
            }
            _ => f(),
        }
    }

    /// Stops the runtime. Idempotent.
    ///
    /// Pending timers are dropped, sleeping workers are told to retire and
    /// every queued task is canceled. Running payloads are given up to the
    /// configured shutdown timeout to return.
    pub(crate) fn shutdown(&self) -> anyhow::Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(workers = self.pool.num_workers(), "runtime shutting down");

        self.timer.shutdown();
        self.pool.wake_all();
        let mut canceled = self.cancel_queued();

        let res = if context::current_worker().is_some() && context::is_current(self) {
            tracing::warn!("runtime shut down from one of its own workers, not waiting for drain");
            Ok(())
        } else {
            self.pool.wait_drained(self.cfg.shutdown_timeout)
        };

        // Tasks promoted by payloads that finished while draining.
        canceled += self.cancel_queued();
        tracing::info!(canceled, "runtime stopped");

        res
    }

    /// Number of live workers serving `qos`.
    pub fn num_workers(&self, qos: Qos) -> usize {
        self.pool.group(qos).num_workers()
    }

    /// Number of workers of `qos` sleeping for lack of work.
    pub fn num_idle(&self, qos: Qos) -> usize {
        self.pool.group(qos).num_idle()
    }

    /// Number of workers of `qos` suspended in a `wait` call.
    pub fn num_blocked(&self, qos: Qos) -> usize {
        self.pool.group(qos).num_blocked()
    }

    /// Number of ready tasks of `qos` not picked up by a worker yet.
    pub fn queue_depth(&self, qos: Qos) -> usize {
        self.queues.len(qos)
    }
}

impl Deref for Handle {
    type Target = Arc<Scheduler>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use anyhow::Result;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Scheduler: Send, Sync);
    assert_impl_all!(Handle: Send, Sync, Clone);

    #[test]
    fn test_handle_introspection_from_crate_root() -> Result<()> {
        let (rt, _svc) = init_runtime(1, None)?;
        let handle: crate::Handle = rt.handle().clone();

        for qos in Qos::ALL {
            assert_eq!(handle.queue_depth(qos), 0);
            assert_eq!(handle.num_blocked(qos), 0);
        }
        assert!(!handle.is_shutdown());
        Ok(())
    }
}
