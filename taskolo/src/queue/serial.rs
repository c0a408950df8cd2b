use crate::context;
use crate::deps::WaitGroup;
use crate::error::{Error, Result};
use crate::qos::Qos;
use crate::queue::SerialItem;
use crate::queue::looper::{Looper, OnTimeout};
use crate::runtime::{Handle, TaskOpts};
use crate::task::{Id, TaskAttr, TaskHandle};
use crate::utils::ScopeGuard;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Draining,
    Stopped,
}

/// Configures a [`SerialQueue`].
pub struct SerialQueueBuilder {
    name: String,
    qos: Qos,
    timeout: Duration,
    on_timeout: Option<OnTimeout>,
}

impl SerialQueueBuilder {
    pub fn qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Supervises every item: `on_timeout` fires if an item still runs
    /// `timeout` after being dispatched. Zero, the default, disables the
    /// watchdog.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(Id) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    /// Creates the queue and starts its looper task, returning once the
    /// looper is running.
    pub fn build(self, handle: &Handle) -> Result<SerialQueue> {
        let timeout = (!self.timeout.is_zero()).then_some(self.timeout);
        let looper = Arc::new(Looper::new(
            self.name.clone(),
            timeout,
            self.on_timeout,
            handle.clone(),
        ));

        let started = Arc::new(WaitGroup::with_count(1));
        let running = Arc::new(AtomicBool::new(false));

        let payload = {
            let looper = Arc::clone(&looper);
            let running = Arc::clone(&running);
            let started = {
                let started = Arc::clone(&started);
                ScopeGuard::new(move || started.done())
            };

            // Released on run and on cancellation alike.
            Box::new(move || {
                running.store(true, Ordering::Release);
                drop(started);
                looper.run();
            })
        };

        let attr = TaskAttr::new().name(self.name.clone()).qos(self.qos);
        let task = handle.submit_inner(
            payload,
            &[],
            &[],
            attr,
            TaskOpts::DETACHED,
        )?;

        handle.block_in_place(|| started.wait());
        if !running.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        tracing::info!(queue = %self.name, qos = %self.qos, ?timeout, "serial queue created");

        Ok(SerialQueue {
            looper,
            task,
            lifecycle: Mutex::new(Lifecycle::Active),
        })
    }
}

/// Executes submitted closures one at a time, in wake time order.
///
/// Items run on a dedicated looper task of the queue's priority class.
///
/// ```no_run
/// use std::time::Duration;
/// use taskolo::{Qos, Runtime, SerialQueue};
///
/// # fn doc() -> anyhow::Result<()> {
/// let rt = Runtime::new()?;
/// let queue = SerialQueue::builder("ui")
///     .qos(Qos::UserInteractive)
///     .timeout(Duration::from_millis(100))
///     .on_timeout(|id| eprintln!("item {} is late", id))
///     .build(rt.handle())?;
///
/// let item = queue.submit(|| println!("first"))?;
/// queue.submit_delayed(|| println!("later"), Duration::from_millis(10))?;
/// item.wait();
/// queue.quit()?;
/// # Ok(())
/// # }
/// ```
pub struct SerialQueue {
    pub(super) looper: Arc<Looper>,

    /// The looper task.
    task: TaskHandle,
    lifecycle: Mutex<Lifecycle>,
}

impl SerialQueue {
    pub fn builder(name: impl Into<String>) -> SerialQueueBuilder {
        SerialQueueBuilder {
            name: name.into(),
            qos: Qos::Default,
            timeout: Duration::ZERO,
            on_timeout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.looper.name
    }

    pub fn submit<F>(&self, f: F) -> Result<SerialHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_delayed(f, Duration::ZERO)
    }

    /// Queues `f` to run no earlier than `delay` from now.
    pub fn submit_delayed<F>(&self, f: F, delay: Duration) -> Result<SerialHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let item = Arc::new(SerialItem::new(Box::new(f)));

        if !self.looper.queue.push(Arc::clone(&item), Instant::now() + delay) {
            return Err(Error::ShuttingDown);
        }

        tracing::trace!(queue = %self.name(), id = %item.id(), ?delay, "serial item queued");
        Ok(SerialHandle { item })
    }

    /// Removes an item that was not dispatched yet. Its payload is dropped
    /// without running.
    pub fn cancel(&self, handle: &SerialHandle) -> Result<()> {
        let item = self
            .looper
            .queue
            .remove(handle.id())
            .ok_or(Error::NotQueued)?;

        item.cancel();
        tracing::debug!(queue = %self.name(), id = %item.id(), "serial item canceled");
        Ok(())
    }

    /// Number of items waiting to be dispatched.
    pub fn len(&self) -> usize {
        self.looper.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the queue: the in-flight item finishes, every watchdog is
    /// released and the items still queued are canceled. Idempotent.
    ///
    /// Fails with [`Error::InvalidArgument`] when called from an item of this
    /// same queue, which would wait on itself.
    pub fn quit(&self) -> Result<()> {
        if self.is_own_looper() {
            return Err(Error::InvalidArgument(
                "a serial queue can't be quit from one of its own items",
            ));
        }

        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Stopped {
            return Ok(());
        }

        *lifecycle = Lifecycle::Draining;
        self.looper.queue.exit();

        self.task.wait()?;
        let watchdogs = Arc::clone(&self.looper.watchdogs);
        self.looper.handle.block_in_place(|| watchdogs.wait());

        let leftover = self.looper.queue.drain();
        let canceled = leftover.iter().filter(|item| item.cancel()).count();

        *lifecycle = Lifecycle::Stopped;
        tracing::info!(queue = %self.name(), canceled, "serial queue stopped");

        Ok(())
    }

    fn is_own_looper(&self) -> bool {
        context::current_task_id() == Some(self.task.id())
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        if self.is_own_looper() {
            // Can't wait on ourselves, let the looper wind down on its own.
            self.looper.queue.exit();
            return;
        }

        if let Err(e) = self.quit() {
            tracing::error!(queue = %self.name(), error = %e, "failed to quit serial queue");
        }
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name())
            .field("lifecycle", &*self.lifecycle.lock())
            .field("queued", &self.len())
            .finish()
    }
}

/// Handle to an item of a [`SerialQueue`].
#[derive(Debug, Clone)]
pub struct SerialHandle {
    item: Arc<SerialItem>,
}

impl SerialHandle {
    pub fn id(&self) -> Id {
        self.item.id()
    }

    /// True once the item ran or was canceled.
    pub fn is_finished(&self) -> bool {
        self.item.is_finished()
    }

    /// Blocks until the item ran or was canceled.
    pub fn wait(&self) {
        self.item.wait();
    }
}
