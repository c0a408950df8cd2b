//! Utilization prediction and the actuator it feeds.

use crate::qos::Qos;
use crate::sys::{self, GroupId, QosService, current_tid};
use std::fmt;
use std::sync::Arc;

/// Fixed point shift of utilization values.
pub const SCHED_CAPACITY_SHIFT: u32 = 10;

/// Utilization of a fully busy CPU.
pub const SCHED_MAX_CAPACITY: u64 = 1 << SCHED_CAPACITY_SHIFT;

/// Predicts the utilization needed to fit `load` ns of work in a window of
/// `window` ns. A zero window is treated as 1 ns, the result is clamped to
/// [`SCHED_MAX_CAPACITY`].
pub fn predict_util(window: u64, load: u64) -> u64 {
    let window = window.max(1) as u128;
    let util = ((load as u128) << SCHED_CAPACITY_SHIFT) / window;

    util.min(SCHED_MAX_CAPACITY as u128) as u64
}

/// Holds the predicted and the applied utilization of one interval, and
/// pushes the latter to the scheduling service.
pub(crate) struct PerfCtrl {
    qos: Qos,
    group: Option<GroupId>,
    svc: Arc<dyn QosService>,
    window: u64,
    predicted: u64,
    current: u64,
}

impl PerfCtrl {
    pub(crate) fn new(qos: Qos, group: Option<GroupId>, svc: Arc<dyn QosService>) -> Self {
        Self {
            qos,
            group,
            svc,
            window: 1,
            predicted: 0,
            current: 0,
        }
    }

    pub(crate) fn set_window_size(&mut self, window: u64) {
        self.window = window.max(1);
    }

    /// Predicts from `window` and `load`, then applies.
    pub(crate) fn update(&mut self, window: u64, load: u64, force: bool) -> bool {
        self.predicted = predict_util(window, load);
        self.update_util(force)
    }

    /// Applies the last prediction if it differs from what is applied, or
    /// unconditionally when `force` is set. Returns whether the service was
    /// called.
    pub(crate) fn update_util(&mut self, force: bool) -> bool {
        if !force && self.predicted == self.current {
            return false;
        }

        self.current = self.predicted;
        tracing::trace!(qos = %self.qos, group = ?self.group, util = self.current, "utilization hint");

        sys::log_failure(
            "set_utilization_hint",
            self.svc.set_utilization_hint(self.group, self.current),
        );
        true
    }

    pub(crate) fn clear(&mut self) {
        self.predicted = 0;
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.svc.is_busy(self.group)
    }

    #[cfg(test)]
    pub(crate) fn predicted(&self) -> u64 {
        self.predicted
    }

    pub(crate) fn current(&self) -> u64 {
        self.current
    }

    pub(crate) fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// Adds the calling thread to the bound thread group.
    pub(crate) fn join(&self) -> bool {
        let Some(group) = self.group else {
            tracing::warn!(qos = %self.qos, "no thread group bound, join ignored");
            return false;
        };

        sys::log_failure("join_thread_group", self.svc.join_thread_group(group, current_tid())).is_some()
    }

    pub(crate) fn leave(&self) -> bool {
        let Some(group) = self.group else {
            tracing::warn!(qos = %self.qos, "no thread group bound, leave ignored");
            return false;
        };

        sys::log_failure("leave_thread_group", self.svc.leave_thread_group(group, current_tid())).is_some()
    }
}

impl fmt::Debug for PerfCtrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerfCtrl")
            .field("qos", &self.qos)
            .field("group", &self.group)
            .field("window", &self.window)
            .field("predicted", &self.predicted)
            .field("current", &self.current)
            .finish()
    }
}
