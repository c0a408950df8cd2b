use crate::qos::Qos;
use crate::runtime::Handle;

/// Events reported to the monitor of a priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskNotify {
    /// A task was pushed to the class ready queue.
    Added,

    /// A worker popped a task off the class ready queue.
    Picked,

    /// A worker of the class suspended itself in `wait`.
    WorkerBlocked,
}

/// Spawn policy: one more worker is needed while queued tasks outnumber the
/// workers able to serve them, up to the class allotment.
pub(super) fn should_spawn(depth: usize, active: usize, max_workers: usize) -> bool {
    depth > active && active < max_workers
}

impl Handle {
    /// Keeps the class staffed: an idle worker is always preferred over
    /// spawning a new one.
    pub(crate) fn notify(&self, qos: Qos, event: TaskNotify) {
        if self.is_shutdown() {
            return;
        }

        let depth = self.queues.len(qos);
        if depth == 0 {
            return;
        }

        let group = self.pool.group(qos);
        if group.wake_one() {
            return;
        }

        if event == TaskNotify::Picked {
            return;
        }

        if should_spawn(depth, group.num_active(), self.cfg.max_workers(qos)) && group.inc_worker(self) {
            tracing::debug!(%qos, ?event, depth, "spawned worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty_queue(0, 0, 4, false)]
    #[case::first_task(1, 0, 4, true)]
    #[case::enough_workers(2, 2, 4, false)]
    #[case::backlog(5, 2, 4, true)]
    #[case::allotment_full(9, 4, 4, false)]
    #[case::single_slot_taken(3, 1, 1, false)]
    fn test_spawn_policy(
        #[case] depth: usize,
        #[case] active: usize,
        #[case] max: usize,
        #[case] expected: bool,
    ) {
        assert_eq!(should_spawn(depth, active, max), expected);
    }
}
