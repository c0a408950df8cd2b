//! Boundary to the OS scheduling service.
//!
//! The runtime never depends on this service succeeding: every failure is
//! logged and the core keeps making progress.

use crate::qos::Qos;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};

/// Identifier of an OS thread group, as handed out by the scheduling service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub i32);

/// Kernel thread id of an OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(pub i32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Returns the kernel thread id of the calling thread.
pub fn current_tid() -> Tid {
    // Safety: gettid takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    Tid(tid as i32)
}

/// OS-level scheduling hints for priority classes.
///
/// Implementations are called from worker threads, the interval controller
/// and serial queues, concurrently.
pub trait QosService: fmt::Debug + Send + Sync + 'static {
    /// Applies the scheduling attributes of `qos` to the calling thread.
    fn apply_qos(&self, qos: Qos) -> io::Result<()>;

    /// Resets the calling thread to the default scheduling attributes.
    fn leave_qos(&self) -> io::Result<()>;

    fn create_thread_group(&self, qos: Qos) -> io::Result<GroupId>;

    fn destroy_thread_group(&self, group: GroupId) -> io::Result<()>;

    fn join_thread_group(&self, group: GroupId, tid: Tid) -> io::Result<()>;

    fn leave_thread_group(&self, group: GroupId, tid: Tid) -> io::Result<()>;

    /// Pushes a utilization hint in `[0, SCHED_MAX_CAPACITY]` for the given
    /// group, or for the calling thread when no group is bound.
    fn set_utilization_hint(&self, group: Option<GroupId>, util: u64) -> io::Result<()>;

    /// Whether the actuator is currently owned by someone else.
    fn is_busy(&self, _group: Option<GroupId>) -> bool {
        false
    }
}

/// Service used when the embedder does not provide one. Only records the
/// requests in trace logs.
#[derive(Debug, Default)]
pub struct NoopQosService {
    next_group: AtomicI32,
}

impl QosService for NoopQosService {
    fn apply_qos(&self, qos: Qos) -> io::Result<()> {
        tracing::trace!(tid = %current_tid(), %qos, "apply qos");
        Ok(())
    }

    fn leave_qos(&self) -> io::Result<()> {
        tracing::trace!(tid = %current_tid(), "leave qos");
        Ok(())
    }

    fn create_thread_group(&self, qos: Qos) -> io::Result<GroupId> {
        let group = GroupId(self.next_group.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::trace!(?group, %qos, "create thread group");
        Ok(group)
    }

    fn destroy_thread_group(&self, group: GroupId) -> io::Result<()> {
        tracing::trace!(?group, "destroy thread group");
        Ok(())
    }

    fn join_thread_group(&self, group: GroupId, tid: Tid) -> io::Result<()> {
        tracing::trace!(?group, %tid, "join thread group");
        Ok(())
    }

    fn leave_thread_group(&self, group: GroupId, tid: Tid) -> io::Result<()> {
        tracing::trace!(?group, %tid, "leave thread group");
        Ok(())
    }

    fn set_utilization_hint(&self, group: Option<GroupId>, util: u64) -> io::Result<()> {
        tracing::trace!(?group, util, "set utilization hint");
        Ok(())
    }
}

/// Logs a failed service request. Service failures never stop the runtime.
pub(crate) fn log_failure<T>(op: &'static str, res: io::Result<T>) -> Option<T> {
    match res {
        Ok(val) => Some(val),
        Err(e) => {
            tracing::warn!(op, error = %e, "scheduling service request failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_tid_differs_across_threads() {
        let main_tid = current_tid();
        assert!(main_tid.0 > 0);

        let other = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(main_tid, other);
        assert_eq!(main_tid, current_tid());
    }

    #[test]
    fn test_noop_service_hands_out_distinct_groups() {
        let svc = NoopQosService::default();
        let a = svc.create_thread_group(Qos::DeadlineRequest).unwrap();
        let b = svc.create_thread_group(Qos::UserInteractive).unwrap();

        assert_ne!(a, b);
        assert!(!svc.is_busy(Some(a)));
        assert!(svc.join_thread_group(a, current_tid()).is_ok());
    }

    #[test]
    fn test_log_failure_swallows_errors() {
        assert_eq!(log_failure("ok", Ok(3)), Some(3));
        assert_eq!(
            log_failure::<()>("err", Err(io::Error::from_raw_os_error(libc::EPERM))),
            None
        );
    }
}
