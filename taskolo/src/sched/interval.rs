use crate::error::{Error, Result};
use crate::qos::Qos;
use crate::runtime::Handle;
use crate::sched::perf::PerfCtrl;
use crate::sched::{Deadline, IntervalLoadPredictor, LoadTracker, TaskSwitchState};
use crate::sys::GroupId;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;

/// A recurring workload that must complete within `deadline`.
///
/// Each window opens with [`begin`](Interval::begin) and closes with
/// [`end`](Interval::end). The load measured over past windows predicts the
/// next one and the utilization hint of the class thread group is set so the
/// work fits the deadline. [`checkpoint`](Interval::checkpoint) refines the
/// hint from what is left of the window.
///
/// ```no_run
/// use std::time::Duration;
/// use taskolo::{Interval, Qos, Runtime};
///
/// # fn doc() -> anyhow::Result<()> {
/// let rt = Runtime::new()?;
/// let frame = Interval::new(rt.handle(), Duration::from_millis(16), Qos::UserInteractive)?;
///
/// for _ in 0..3 {
///     frame.begin()?;
///     // render
///     frame.end();
/// }
/// # Ok(())
/// # }
/// ```
pub struct Interval {
    handle: Handle,
    qos: Qos,
    inner: Mutex<Inner>,
}

struct Inner {
    active: bool,
    deadline: Deadline,
    tracker: LoadTracker,
    predictor: IntervalLoadPredictor,
    ctrl: PerfCtrl,
}

impl Interval {
    /// Creates an interval for `qos` and takes a reference on the class
    /// thread group. Classes not configured for thread groups hint the
    /// calling thread instead.
    ///
    /// Only [`Qos::UserInteractive`] work is deadline driven, any other class
    /// is rejected with [`Error::InvalidArgument`].
    pub fn new(handle: &Handle, deadline: Duration, qos: Qos) -> Result<Interval> {
        if handle.is_shutdown() {
            return Err(Error::ShuttingDown);
        }

        if qos < Qos::UserInteractive {
            tracing::warn!(%qos, "interval rejected, class is not deadline driven");
            return Err(Error::InvalidArgument("interval class must be UserInteractive"));
        }

        let svc = handle.cfg.qos_service.clone();
        let group = handle.pool.group(qos).bind_thread_group(svc.as_ref());

        let deadline = Deadline::new(deadline);
        let mut ctrl = PerfCtrl::new(qos, group, svc);
        ctrl.set_window_size(deadline.to_ns());

        tracing::debug!(%qos, ?group, deadline_ns = deadline.to_ns(), "interval created");

        Ok(Interval {
            handle: handle.clone(),
            qos,
            inner: Mutex::new(Inner {
                active: false,
                deadline,
                tracker: LoadTracker::default(),
                predictor: IntervalLoadPredictor::default(),
                ctrl,
            }),
        })
    }

    /// Opens a window and applies the utilization predicted for a whole one.
    pub fn begin(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.active {
            return Err(Error::IntervalActive);
        }

        if inner.ctrl.is_busy() {
            tracing::debug!(qos = %self.qos, "interval actuator busy");
            return Err(Error::Busy);
        }

        inner.active = true;
        inner.deadline.restart();
        inner.tracker.begin();

        let (window, load) = (inner.deadline.to_ns(), inner.predictor.total_load());
        inner.ctrl.update(window, load, true);
        inner.predictor.reset_cp_index();

        Ok(())
    }

    /// Changes the deadline, effective from now. Ignored outside a window.
    pub fn update(&self, deadline: Duration) {
        let mut inner = self.inner.lock();
        if !inner.active {
            return;
        }

        inner.deadline.update(deadline);
        let window = inner.deadline.to_ns();
        inner.ctrl.set_window_size(window);
    }

    /// Closes the window and feeds its load to the predictor. Ignored
    /// outside a window.
    pub fn end(&self) {
        let mut inner = self.inner.lock();
        if !inner.active {
            return;
        }

        inner.active = false;
        let load = inner.tracker.load();
        inner.predictor.update_total_load(load);
        inner.tracker.end();

        tracing::trace!(qos = %self.qos, load, "interval window closed");
    }

    /// Re-predicts from the load expected in the rest of the window, then
    /// records the load seen so far at this checkpoint.
    pub fn checkpoint(&self) {
        let mut inner = self.inner.lock();
        if !inner.active {
            return;
        }

        let (left, load) = (inner.deadline.left_ns(), inner.predictor.cp_load());
        inner.ctrl.update(left, load, false);

        let seen = inner.tracker.load();
        inner.predictor.update_cp_load(seen);
    }

    /// Adds the calling thread to the interval's thread group. Failures are
    /// logged.
    pub fn join(&self) {
        self.inner.lock().ctrl.join();
    }

    pub fn leave(&self) {
        self.inner.lock().ctrl.leave();
    }

    /// Feeds a task switch of the tracked workload.
    pub fn update_task_switch(&self, state: TaskSwitchState) {
        let mut inner = self.inner.lock();

        match state {
            TaskSwitchState::Begin => {
                inner.ctrl.update_util(true);
            }
            TaskSwitchState::Update => {
                inner.ctrl.update_util(false);
            }
            TaskSwitchState::End => {
                inner.ctrl.clear();
                inner.ctrl.update_util(true);
            }
        }

        inner.tracker.record(state);
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Utilization last pushed to the scheduling service.
    pub fn utilization(&self) -> u64 {
        self.inner.lock().ctrl.current()
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_nanos(self.inner.lock().deadline.to_ns())
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }

    pub fn thread_group(&self) -> Option<GroupId> {
        self.inner.lock().ctrl.group()
    }
}

impl Drop for Interval {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.ctrl.update(1, 0, true);

        let svc = self.handle.cfg.qos_service.as_ref();
        self.handle.pool.group(self.qos).unbind_thread_group(svc);
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Interval")
            .field("qos", &self.qos)
            .field("active", &inner.active)
            .field("deadline_ns", &inner.deadline.to_ns())
            .field("ctrl", &inner.ctrl)
            .finish()
    }
}
