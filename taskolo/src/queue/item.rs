use crate::task::{Id, Payload};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemState {
    Queued,
    Running,
    Finished,
    Canceled,
}

impl ItemState {
    fn is_terminal(self) -> bool {
        matches!(self, ItemState::Finished | ItemState::Canceled)
    }
}

/// A unit of work submitted to a serial queue.
pub(crate) struct SerialItem {
    id: Id,
    payload: Mutex<Option<Payload>>,
    state: Mutex<ItemState>,
    cond: Condvar,
}

impl SerialItem {
    pub(crate) fn new(payload: Payload) -> SerialItem {
        SerialItem {
            id: Id::next(),
            payload: Mutex::new(Some(payload)),
            state: Mutex::new(ItemState::Queued),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn state(&self) -> ItemState {
        *self.state.lock()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Runs the payload on the calling thread, then `on_done` right before the
    /// item turns terminal and its waiters wake up. Returns false, without
    /// calling `on_done`, if the item was canceled first.
    pub(crate) fn run(&self, on_done: impl FnOnce()) -> bool {
        {
            let mut state = self.state.lock();
            if *state != ItemState::Queued {
                return false;
            }
            *state = ItemState::Running;
        }

        if let Some(payload) = self.payload.lock().take()
            && panic::catch_unwind(AssertUnwindSafe(payload)).is_err()
        {
            tracing::error!(id = %self.id, "serial item panicked");
        }

        on_done();
        self.finish(ItemState::Finished);
        true
    }

    /// Tears a queued item down without running it.
    pub(crate) fn cancel(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state != ItemState::Queued {
                return false;
            }
            *state = ItemState::Canceled;
        }

        drop(self.payload.lock().take());
        self.cond.notify_all();
        true
    }

    fn finish(&self, terminal: ItemState) {
        *self.state.lock() = terminal;
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut state = self.state.lock();
        self.cond.wait_while(&mut state, |s| !s.is_terminal());
    }
}

impl fmt::Debug for SerialItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialItem")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_run_then_cancel_is_noop() {
        let hits = Arc::new(AtomicUsize::new(0));
        let item = {
            let hits = Arc::clone(&hits);
            SerialItem::new(Box::new(move || {
                hits.fetch_add(1, Ordering::Relaxed);
            }))
        };

        assert!(item.run(|| {}));
        assert!(!item.run(|| panic!("ran twice")));
        assert!(!item.cancel());
        assert_eq!(item.state(), ItemState::Finished);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cancel_drops_payload_and_releases_waiters() {
        let counter = DropCounter::new();
        let guard = counter.guard();
        let item = Arc::new(SerialItem::new(Box::new(move || drop(guard))));

        let waiter = {
            let item = Arc::clone(&item);
            std::thread::spawn(move || item.wait())
        };

        assert!(item.cancel());
        waiter.join().unwrap();

        assert_eq!(counter.dropped(), 1);
        assert!(item.is_finished());
        assert!(!item.run(|| panic!("canceled item ran")));
    }

    #[test]
    fn test_panicking_payload_still_finishes() {
        let item = SerialItem::new(Box::new(|| panic!("boom")));
        let mut seen = None;

        assert!(item.run(|| seen = Some(item.state())));
        assert_eq!(seen, Some(ItemState::Running));
        assert_eq!(item.state(), ItemState::Finished);
    }

    #[test]
    fn test_done_hook_visible_to_waiters() {
        let item = Arc::new(SerialItem::new(Box::new(|| {})));
        let hooked = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let (item, hooked) = (Arc::clone(&item), Arc::clone(&hooked));
            std::thread::spawn(move || {
                item.wait();
                hooked.load(Ordering::Relaxed)
            })
        };

        let hook = Arc::clone(&hooked);
        assert!(item.run(move || {
            hook.fetch_add(1, Ordering::Relaxed);
        }));

        assert_eq!(waiter.join().unwrap(), 1);
    }
}
