//! Per-class worker threads.
//!
//! Every priority class owns a [`WorkerGroup`]: its live workers, the idle/wake
//! pair workers sleep on and its OS thread-group binding. Workers are spawned
//! on demand by the monitor and retire on their own after sitting idle.

use crate::qos::Qos;
use crate::runtime::{Handle, RuntimeConfig};
use crate::sys::{self, GroupId, QosService, Tid, current_tid};
use crate::utils::ScopeGuard;
use anyhow::{Result, anyhow};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

// Exports
mod monitor;
pub(crate) use monitor::TaskNotify;

mod worker;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerAction {
    /// Work showed up, go pick it.
    Retry,

    /// The worker already left the live set and must exit.
    Retire,
}

#[derive(Debug)]
pub(crate) struct ThreadPool {
    groups: [WorkerGroup; Qos::COUNT],
}

impl ThreadPool {
    pub(crate) fn new(cfg: &RuntimeConfig) -> Self {
        Self {
            groups: Qos::ALL.map(|qos| WorkerGroup::new(qos, cfg)),
        }
    }

    pub(crate) fn group(&self, qos: Qos) -> &WorkerGroup {
        &self.groups[qos.index()]
    }

    /// Wakes every sleeping worker. Called once the teardown flag is set, so
    /// they all come back with a retire decision.
    pub(crate) fn wake_all(&self) {
        for group in &self.groups {
            let _sleep = group.sleep.lock();
            group.wake.notify_all();
        }
    }

    /// Waits until every class dropped to zero workers, or `timeout` elapsed.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut remaining = 0;

        for group in &self.groups {
            let mut workers = group.workers.lock();
            let left = deadline.saturating_duration_since(Instant::now());

            group
                .drained
                .wait_while_for(&mut workers, |w| !w.is_empty(), left);

            remaining += workers.len();
        }

        if remaining == 0 {
            Ok(())
        } else {
            Err(anyhow!(
                "{} worker(s) still busy after {:?}",
                remaining,
                timeout
            ))
        }
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.groups.iter().map(WorkerGroup::num_workers).sum()
    }
}

#[derive(Debug, Default)]
struct SleepState {
    idle: usize,
}

#[derive(Debug, Default)]
struct Binding {
    group: Option<GroupId>,

    /// Number of owners sharing the OS thread group.
    ref_count: usize,

    /// Live workers of the class, joined to `group` while it is bound.
    members: HashMap<ThreadId, Tid>,
}

#[derive(Debug)]
pub(crate) struct WorkerGroup {
    qos: Qos,
    max_workers: usize,
    idle_timeout: Duration,
    allow_thread_group: bool,

    /// Live workers. Only mutated under this lock: insert on spawn, remove on
    /// retirement.
    workers: Mutex<HashMap<ThreadId, JoinHandle<()>>>,

    /// Signaled every time a worker leaves `workers`.
    drained: Condvar,

    sleep: Mutex<SleepState>,
    wake: Condvar,

    /// Workers suspended in a `wait` call. They don't count toward the class
    /// allotment.
    blocked: AtomicUsize,

    binding: Mutex<Binding>,

    spawned: AtomicUsize,
    retired: AtomicUsize,
}

impl WorkerGroup {
    fn new(qos: Qos, cfg: &RuntimeConfig) -> Self {
        Self {
            qos,
            max_workers: cfg.max_workers(qos),
            idle_timeout: cfg.idle_timeout,
            allow_thread_group: cfg.thread_group_classes.contains_qos(qos),
            workers: Mutex::new(HashMap::new()),
            drained: Condvar::new(),
            sleep: Mutex::new(SleepState::default()),
            wake: Condvar::new(),
            blocked: AtomicUsize::new(0),
            binding: Mutex::new(Binding::default()),
            spawned: AtomicUsize::new(0),
            retired: AtomicUsize::new(0),
        }
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.workers.lock().len()
    }

    pub(crate) fn num_idle(&self) -> usize {
        self.sleep.lock().idle
    }

    pub(crate) fn num_blocked(&self) -> usize {
        self.blocked.load(Ordering::Acquire)
    }

    /// Live workers currently counting toward the class allotment.
    pub(crate) fn num_active(&self) -> usize {
        self.num_workers().saturating_sub(self.num_blocked())
    }

    pub(crate) fn num_spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    pub(crate) fn num_retired(&self) -> usize {
        self.retired.load(Ordering::Relaxed)
    }

    /// Wakes one sleeping worker, if any.
    pub(crate) fn wake_one(&self) -> bool {
        let sleep = self.sleep.lock();
        if sleep.idle > 0 {
            self.wake.notify_one();
            true
        } else {
            false
        }
    }

    /// Spawns one more worker for this class. No-op while tearing down or when
    /// the allotment is full. A failed spawn is logged and leaves the task
    /// queued, the next `TaskAdded` retries.
    pub(crate) fn inc_worker(&self, handle: &Handle) -> bool {
        let mut workers = self.workers.lock();

        if handle.is_shutdown() {
            return false;
        }

        let active = workers.len().saturating_sub(self.num_blocked());
        if active >= self.max_workers {
            return false;
        }

        match worker::spawn(handle.clone(), self.qos) {
            Ok(join) => {
                workers.insert(join.thread().id(), join);
                self.spawned.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::error!(qos = %self.qos, error = %e, "failed to spawn worker");
                false
            }
        }
    }

    /// Called by a worker that found no task. Sleeps until work shows up,
    /// teardown starts or the idle timeout elapses.
    pub(crate) fn idle_action(&self, handle: &Handle) -> WorkerAction {
        let mut sleep = self.sleep.lock();

        if !handle.is_shutdown() {
            if !handle.queues.is_empty(self.qos) {
                return WorkerAction::Retry;
            }

            sleep.idle += 1;
            self.wake.wait_while_for(
                &mut sleep,
                |_| !handle.is_shutdown() && handle.queues.is_empty(self.qos),
                self.idle_timeout,
            );
            sleep.idle -= 1;

            if !handle.is_shutdown() && !handle.queues.is_empty(self.qos) {
                return WorkerAction::Retry;
            }
        }

        // Leave the live set before releasing the sleep lock: a monitor that
        // no longer sees us idle must not count us as live either.
        let mut workers = self.workers.lock();
        workers.remove(&thread::current().id());
        self.retired.fetch_add(1, Ordering::Relaxed);
        self.drained.notify_all();

        WorkerAction::Retire
    }

    /// Marks the calling worker as blocked until the guard drops, letting the
    /// monitor bring in another worker for the class.
    pub(crate) fn enter_blocking<'a>(&'a self, handle: &Handle) -> ScopeGuard<impl FnOnce() + 'a> {
        self.blocked.fetch_add(1, Ordering::AcqRel);
        handle.notify(self.qos, TaskNotify::WorkerBlocked);

        ScopeGuard::new(move || {
            self.blocked.fetch_sub(1, Ordering::AcqRel);
        })
    }

    /// Records the calling worker and joins the bound thread group, if any.
    pub(crate) fn register_member(&self, svc: &dyn QosService) {
        let tid = current_tid();
        let mut binding = self.binding.lock();

        binding.members.insert(thread::current().id(), tid);
        if let Some(group) = binding.group {
            sys::log_failure("join_thread_group", svc.join_thread_group(group, tid));
        }
    }

    pub(crate) fn unregister_member(&self, svc: &dyn QosService) {
        let mut binding = self.binding.lock();

        if let Some(tid) = binding.members.remove(&thread::current().id())
            && let Some(group) = binding.group
        {
            sys::log_failure("leave_thread_group", svc.leave_thread_group(group, tid));
        }
    }

    /// Takes a reference on the class thread group, creating it and enrolling
    /// every live worker on first use. Returns `None` if the class is not
    /// configured for thread groups or the service failed to create one.
    pub(crate) fn bind_thread_group(&self, svc: &dyn QosService) -> Option<GroupId> {
        if !self.allow_thread_group {
            return None;
        }

        let mut binding = self.binding.lock();
        binding.ref_count += 1;

        if binding.group.is_none() {
            let group = sys::log_failure("create_thread_group", svc.create_thread_group(self.qos))?;

            for tid in binding.members.values() {
                sys::log_failure("join_thread_group", svc.join_thread_group(group, *tid));
            }

            tracing::info!(qos = %self.qos, ?group, members = binding.members.len(), "thread group bound");
            binding.group = Some(group);
        }

        binding.group
    }

    /// Drops a reference taken by [`bind_thread_group`](Self::bind_thread_group).
    /// The last one makes every worker leave and destroys the group.
    pub(crate) fn unbind_thread_group(&self, svc: &dyn QosService) {
        if !self.allow_thread_group {
            return;
        }

        let mut binding = self.binding.lock();
        debug_assert!(binding.ref_count > 0, "unbalanced thread group unbind");
        binding.ref_count = binding.ref_count.saturating_sub(1);

        if binding.ref_count > 0 {
            return;
        }

        if let Some(group) = binding.group.take() {
            for tid in binding.members.values() {
                sys::log_failure("leave_thread_group", svc.leave_thread_group(group, *tid));
            }

            sys::log_failure("destroy_thread_group", svc.destroy_thread_group(group));
            tracing::info!(qos = %self.qos, ?group, "thread group released");
        }
    }

    pub(crate) fn thread_group(&self) -> Option<GroupId> {
        self.binding.lock().group
    }

    pub(crate) fn thread_group_refs(&self) -> usize {
        self.binding.lock().ref_count
    }
}
