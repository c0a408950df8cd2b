use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub(crate) type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct TimerId(u64);

/// Runs delayed callbacks on a dedicated thread.
///
/// Callbacks still pending at shutdown are dropped without running, anything
/// they own is released.
pub(crate) struct Timer {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    slack: Duration,
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    callbacks: HashMap<TimerId, Callback>,
    next_id: u64,
    shutdown: bool,
}

impl Timer {
    pub(crate) fn start(name: String, slack: Duration) -> io::Result<Timer> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            slack,
        });

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(name)
                .spawn(move || shared.run())?
        };

        Ok(Timer {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Arms `cb` for `deadline`. Fails if the deadline is not at least the
    /// timer slack away, in which case `cb` is dropped.
    pub(crate) fn schedule_at(&self, deadline: Instant, cb: Callback) -> Result<TimerId> {
        let lead = deadline.saturating_duration_since(Instant::now());
        if lead < self.shared.slack {
            return Err(Error::WatchdogTooShort(lead));
        }

        self.insert(deadline, cb)
    }

    /// Arms `cb` after `delay`, however short.
    pub(crate) fn schedule_after(&self, delay: Duration, cb: Callback) -> Result<TimerId> {
        self.insert(Instant::now() + delay, cb)
    }

    fn insert(&self, deadline: Instant, cb: Callback) -> Result<TimerId> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            drop(state);
            drop(cb);
            return Err(Error::ShuttingDown);
        }

        state.next_id += 1;
        let id = TimerId(state.next_id);

        let is_earliest = state
            .heap
            .peek()
            .is_none_or(|Reverse((at, _))| deadline < *at);

        state.heap.push(Reverse((deadline, id)));
        state.callbacks.insert(id, cb);

        if is_earliest {
            self.shared.cond.notify_one();
        }

        Ok(id)
    }

    /// Disarms a callback that has not fired yet. The callback is dropped.
    pub(crate) fn cancel(&self, id: TimerId) -> bool {
        let cb = self.shared.state.lock().callbacks.remove(&id);
        cb.is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.state.lock().callbacks.len()
    }

    pub(crate) fn shutdown(&self) {
        let pending = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.heap.clear();
            mem::take(&mut state.callbacks)
        };

        self.shared.cond.notify_all();

        // Dropped outside the lock, they may call back into the runtime.
        drop(pending);

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }

            if handle.join().is_err() {
                tracing::error!("timer thread panicked");
            }
        }
    }
}

impl Shared {
    fn run(&self) {
        let mut state = self.state.lock();

        loop {
            if state.shutdown {
                return;
            }

            let Some(Reverse((at, id))) = state.heap.peek().copied() else {
                self.cond.wait(&mut state);
                continue;
            };

            if at > Instant::now() {
                self.cond.wait_until(&mut state, at);
                continue;
            }

            state.heap.pop();

            // Canceled callbacks leave a stale heap entry behind.
            if let Some(cb) = state.callbacks.remove(&id) {
                MutexGuard::unlocked(&mut state, || {
                    if panic::catch_unwind(AssertUnwindSafe(cb)).is_err() {
                        tracing::error!(?id, "timer callback panicked");
                    }
                });
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("pending", &self.len())
            .field("slack", &self.shared.slack)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use anyhow::Result;
    use std::sync::mpsc;

    fn timer() -> Timer {
        Timer::start("taskolo-timer-test".into(), Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn test_callbacks_fire_in_deadline_order() -> Result<()> {
        let timer = timer();
        let (tx, rx) = mpsc::channel();

        for (label, ms) in [("c", 30), ("a", 5), ("b", 15)] {
            let tx = tx.clone();
            timer.schedule_after(Duration::from_millis(ms), Box::new(move || tx.send(label).unwrap()))?;
        }

        let order = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)))
            .collect::<Result<Vec<_>, _>>()?;

        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(timer.len(), 0);
        Ok(())
    }

    #[test]
    fn test_deadline_within_slack_is_rejected() {
        let timer = timer();
        let counter = DropCounter::new();
        let guard = counter.guard();

        let res = timer.schedule_at(Instant::now(), Box::new(move || drop(guard)));

        assert!(matches!(res, Err(Error::WatchdogTooShort(_))));
        assert_eq!(counter.dropped(), 1);
        assert_eq!(timer.len(), 0);
    }

    #[test]
    fn test_cancel_drops_without_running() -> Result<()> {
        let timer = timer();
        let (tx, rx) = mpsc::channel::<()>();

        let id = timer.schedule_after(Duration::from_millis(20), Box::new(move || tx.send(()).unwrap()))?;
        assert!(timer.cancel(id));
        assert!(!timer.cancel(id));

        // The sender was dropped with the callback.
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
        Ok(())
    }

    #[test]
    fn test_shutdown_drops_pending_and_rejects_new() -> Result<()> {
        let timer = timer();
        let counter = DropCounter::new();
        let guard = counter.guard();

        timer.schedule_after(Duration::from_secs(60), Box::new(move || drop(guard)))?;
        timer.shutdown();

        assert_eq!(counter.dropped(), 1);
        assert!(matches!(
            timer.schedule_after(Duration::ZERO, Box::new(|| {})),
            Err(Error::ShuttingDown)
        ));
        Ok(())
    }
}
