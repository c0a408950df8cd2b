use crate::qos::Qos;
use crate::task::Notified;
use crossbeam_deque::{Injector, Steal};
use std::fmt;

/// One FIFO ready queue per priority class.
pub(crate) struct ReadyQueues {
    queues: [Injector<Notified>; Qos::COUNT],
}

impl ReadyQueues {
    pub(crate) fn new() -> Self {
        Self {
            queues: std::array::from_fn(|_| Injector::new()),
        }
    }

    pub(crate) fn push(&self, task: Notified) {
        self.queues[task.qos().index()].push(task);
    }

    /// Pops the head of the class queue. Safe to call from many workers, a
    /// task is only ever handed out once.
    pub(crate) fn pick_next(&self, qos: Qos) -> Option<Notified> {
        let queue = &self.queues[qos.index()];

        loop {
            match queue.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    /// Pops from whichever class still holds work.
    pub(crate) fn pick_any(&self) -> Option<Notified> {
        Qos::ALL.iter().rev().find_map(|qos| self.pick_next(*qos))
    }

    pub(crate) fn len(&self, qos: Qos) -> usize {
        self.queues[qos.index()].len()
    }

    pub(crate) fn is_empty(&self, qos: Qos) -> bool {
        self.queues[qos.index()].is_empty()
    }
}

impl fmt::Debug for ReadyQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for qos in Qos::ALL {
            dbg.entry(&qos, &self.len(qos));
        }
        dbg.finish()
    }
}
