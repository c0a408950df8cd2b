use crate::deps::WaitGroup;
use crate::queue::OrderedQueue;
use crate::queue::item::SerialItem;
use crate::runtime::Handle;
use crate::runtime::timer::TimerId;
use crate::task::Id;
use crate::utils::ScopeGuard;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub(crate) type OnTimeout = Arc<dyn Fn(Id) + Send + Sync + 'static>;

/// State shared by a serial queue and its looper task.
pub(crate) struct Looper {
    pub(crate) name: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) on_timeout: Option<OnTimeout>,
    pub(crate) queue: OrderedQueue,

    /// Armed watchdogs whose callback was not released yet.
    pub(crate) watchdogs: Arc<WaitGroup>,
    pub(crate) handle: Handle,

    dispatched: AtomicUsize,
    timed_out: Arc<AtomicUsize>,
}

impl Looper {
    pub(crate) fn new(
        name: String,
        timeout: Option<Duration>,
        on_timeout: Option<OnTimeout>,
        handle: Handle,
    ) -> Looper {
        Looper {
            name,
            timeout,
            on_timeout,
            queue: OrderedQueue::new(),
            watchdogs: Arc::new(WaitGroup::new()),
            handle,
            dispatched: AtomicUsize::new(0),
            timed_out: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Body of the looper task. Returns once the queue exited or the runtime
    /// is shutting down.
    pub(crate) fn run(&self) {
        tracing::info!(queue = %self.name, "looper started");

        // Waiting for the next item must not hold a slot of the class.
        while let Some(item) = self
            .handle
            .block_in_place(|| self.queue.next(|| self.handle.is_shutdown()))
        {
            self.dispatch(&item);
        }

        tracing::info!(
            queue = %self.name,
            dispatched = self.dispatched(),
            timed_out = self.timed_out(),
            "looper stopped"
        );
    }

    fn dispatch(&self, item: &Arc<SerialItem>) {
        let watchdog = self.arm_watchdog(item);

        // Counted before the item turns terminal, waiters see it.
        let ran = item.run(|| {
            self.dispatched.fetch_add(1, Ordering::Relaxed);
        });

        if ran {
            tracing::debug!(queue = %self.name, id = %item.id(), "serial item done");
        }

        // Disarming drops the callback, which releases its watchdog count.
        if let Some(id) = watchdog {
            self.handle.timer.cancel(id);
        }
    }

    fn arm_watchdog(&self, item: &Arc<SerialItem>) -> Option<TimerId> {
        let timeout = self.timeout?;

        self.watchdogs.add();
        let release = {
            let watchdogs = Arc::clone(&self.watchdogs);
            ScopeGuard::new(move || watchdogs.done())
        };

        let item_ref = Arc::clone(item);
        let on_timeout = self.on_timeout.clone();
        let timed_out = Arc::clone(&self.timed_out);
        let name = self.name.clone();

        let callback = Box::new(move || {
            let _release = release;

            if item_ref.is_finished() {
                return;
            }

            timed_out.fetch_add(1, Ordering::Relaxed);
            tracing::error!(queue = %name, id = %item_ref.id(), ?timeout, "serial item timed out");

            if let Some(on_timeout) = on_timeout {
                on_timeout(item_ref.id());
            }
        });

        match self.handle.timer.schedule_at(Instant::now() + timeout, callback) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(queue = %self.name, id = %item.id(), error = %e, "item runs without watchdog");
                None
            }
        }
    }

    pub(crate) fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub(crate) fn timed_out(&self) -> usize {
        self.timed_out.load(Ordering::Relaxed)
    }
}
