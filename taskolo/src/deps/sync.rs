use parking_lot::{Condvar, Mutex};

/// Counter of outstanding work that threads can block on until it drops to
/// zero.
///
/// Used as a one-shot latch for `wait(tokens)` (created with the number of open
/// tokens) and as the per-context accounting behind `wait_all()`.
#[derive(Debug, Default)]
pub(crate) struct WaitGroup {
    count: Mutex<usize>,
    cond: Condvar,
}

impl WaitGroup {
    pub(crate) fn new() -> Self {
        Self::with_count(0)
    }

    pub(crate) fn with_count(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn add(&self) {
        *self.count.lock() += 1;
    }

    #[track_caller]
    pub(crate) fn done(&self) {
        let mut count = self.count.lock();
        assert!(*count > 0, "wait group counter underflow");

        *count -= 1;
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    pub(crate) fn len(&self) -> usize {
        *self.count.lock()
    }

    pub(crate) fn wait(&self) {
        let mut count = self.count.lock();
        self.cond.wait_while(&mut count, |c| *c > 0);
    }
}
