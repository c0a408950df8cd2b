use crate::queue::item::SerialItem;
use crate::task::Id;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on a single wait in [`OrderedQueue::next`], so the `stop`
/// predicate is re-checked even when nobody notifies the queue.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

type Key = (Instant, u64);

#[derive(Debug, Default)]
struct Inner {
    items: BTreeMap<Key, Arc<SerialItem>>,
    index: HashMap<Id, Key>,

    /// Arrival order, breaks ties between equal wake times.
    seq: u64,
    exit: bool,
}

/// Items ordered by wake time, then arrival.
#[derive(Debug, Default)]
pub(crate) struct OrderedQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl OrderedQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns false, dropping nothing, if the queue already exited.
    pub(crate) fn push(&self, item: Arc<SerialItem>, wake_at: Instant) -> bool {
        let mut inner = self.inner.lock();
        if inner.exit {
            return false;
        }

        inner.seq += 1;
        let key = (wake_at, inner.seq);

        inner.index.insert(item.id(), key);
        inner.items.insert(key, item);

        self.cond.notify_all();
        true
    }

    /// Blocks until the earliest item is due, then pops it. Returns `None`
    /// once the queue exited or `stop` returns true.
    pub(crate) fn next(&self, stop: impl Fn() -> bool) -> Option<Arc<SerialItem>> {
        let mut inner = self.inner.lock();

        loop {
            if inner.exit || stop() {
                return None;
            }

            let now = Instant::now();
            let poll = now + STOP_POLL_INTERVAL;

            match inner.items.first_key_value().map(|(key, _)| *key) {
                Some(key) if key.0 <= now => {
                    let item = inner.items.remove(&key)?;
                    inner.index.remove(&item.id());
                    return Some(item);
                }
                Some((wake_at, _)) => {
                    self.cond.wait_until(&mut inner, wake_at.min(poll));
                }
                None => {
                    self.cond.wait_until(&mut inner, poll);
                }
            }
        }
    }

    /// Takes a still-queued item out.
    pub(crate) fn remove(&self, id: Id) -> Option<Arc<SerialItem>> {
        let mut inner = self.inner.lock();
        let key = inner.index.remove(&id)?;
        inner.items.remove(&key)
    }

    /// Makes `next` return `None` and `push` fail from now on.
    pub(crate) fn exit(&self) {
        self.inner.lock().exit = true;
        self.cond.notify_all();
    }

    /// Removes every remaining item, in order.
    pub(crate) fn drain(&self) -> Vec<Arc<SerialItem>> {
        let mut inner = self.inner.lock();
        inner.index.clear();
        std::mem::take(&mut inner.items).into_values().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().items.len()
    }
}
