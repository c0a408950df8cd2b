use crate::qos::{Qos, QosMask};
use crate::runtime::{Runtime, Scheduler};
use crate::sys::{NoopQosService, QosService};
use anyhow::{Result, ensure};
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Workers idle for longer than this retire.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on how long shutdown waits for workers to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Watchdogs armed closer than this to their deadline are rejected.
const TIMER_SLACK: Duration = Duration::from_millis(1);

const MIN_STACK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let worker_count = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = worker_count.fetch_add(1, Ordering::Relaxed);
        format!("taskolo-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and creates a [`Runtime`].
///
/// ```no_run
/// use std::time::Duration;
/// use taskolo::Qos;
/// use taskolo::runtime::Builder;
///
/// # fn doc() -> anyhow::Result<()> {
/// let rt = Builder::new()
///     .max_workers(4)
///     .max_workers_for(Qos::Background, 1)
///     .idle_timeout(Duration::from_secs(1))
///     .thread_name("app")
///     .try_build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Builder {
    /// Worker allotment of every class without an explicit override.
    /// Defaults to one worker per CPU core.
    max_workers: Option<usize>,

    max_workers_for: [Option<usize>; Qos::COUNT],

    idle_timeout: Duration,

    shutdown_timeout: Duration,

    /// Name fn used for threads spawned by the runtime.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the runtime.
    thread_stack_size: Option<usize>,

    /// Classes allowed to bind an OS thread group.
    thread_group_classes: QosMask,

    timer_slack: Duration,

    qos_service: Arc<dyn QosService>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            max_workers: None,
            max_workers_for: [None; Qos::COUNT],
            idle_timeout: IDLE_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            thread_group_classes: QosMask::DEADLINE_REQUEST | QosMask::USER_INTERACTIVE,
            timer_slack: TIMER_SLACK,
            qos_service: Arc::new(NoopQosService::default()),
        }
    }

    /// Maximum number of workers serving each priority class. Workers blocked
    /// in [`wait`](crate::wait) do not count.
    #[track_caller]
    pub fn max_workers(mut self, val: usize) -> Self {
        assert!(val > 0, "max_workers must be greater than 0");
        self.max_workers = Some(val);
        self
    }

    /// Overrides [`max_workers`](Builder::max_workers) for one class.
    #[track_caller]
    pub fn max_workers_for(mut self, qos: Qos, val: usize) -> Self {
        assert!(val > 0, "max_workers_for must be greater than 0");
        self.max_workers_for[qos.index()] = Some(val);
        self
    }

    /// How long a worker without work waits before retiring.
    ///
    /// The default is 5 seconds.
    #[track_caller]
    pub fn idle_timeout(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "idle_timeout must be greater than 0");
        self.idle_timeout = val;
        self
    }

    /// Bound on how long shutdown waits for running tasks.
    pub fn shutdown_timeout(mut self, val: Duration) -> Self {
        self.shutdown_timeout = val;
        self
    }

    /// Sets name of threads spawned by the `Runtime`.
    ///
    /// The default name is "taskolo-{id}", where id is monotonically
    /// increasing.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate the name of threads spawned by the `Runtime`.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for worker threads.
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(
            val.is_power_of_two(),
            "thread_stack_size must be a power of two"
        );
        self.thread_stack_size = Some(val);
        self
    }

    /// Classes whose workers may join an OS thread group, once an
    /// [`Interval`](crate::Interval) binds one.
    ///
    /// Defaults to `DEADLINE_REQUEST | USER_INTERACTIVE`.
    pub fn thread_group_classes(mut self, classes: QosMask) -> Self {
        self.thread_group_classes = classes;
        self
    }

    /// Minimum lead time for arming a serial queue watchdog.
    pub fn timer_slack(mut self, val: Duration) -> Self {
        self.timer_slack = val;
        self
    }

    /// OS scheduling service receiving QoS, thread group and utilization
    /// requests. Defaults to a service that only logs.
    pub fn qos_service(mut self, service: Arc<dyn QosService>) -> Self {
        self.qos_service = service;
        self
    }

    /// Creates the configured `Runtime`.
    ///
    /// Workers are spawned lazily, as tasks show up.
    pub fn try_build(self) -> Result<Runtime> {
        let cfg = RuntimeConfig::try_from(self)?;
        let handle = Scheduler::try_new(cfg)?.into_handle();

        Ok(Runtime::from_handle(handle))
    }
}

// Export runtime builder as a RuntimeConfig object shared by the scheduler
// and every worker.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) max_workers: [usize; Qos::COUNT],
    pub(crate) idle_timeout: Duration,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) thread_group_classes: QosMask,
    pub(crate) timer_slack: Duration,
    pub(crate) qos_service: Arc<dyn QosService>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_workers: [1; Qos::COUNT],
            idle_timeout: IDLE_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            thread_group_classes: QosMask::DEADLINE_REQUEST | QosMask::USER_INTERACTIVE,
            timer_slack: TIMER_SLACK,
            qos_service: Arc::new(NoopQosService::default()),
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        for qos in Qos::ALL {
            ensure!(
                self.max_workers[qos.index()] > 0,
                "{} class has no worker allotment",
                qos
            );
        }

        if let Some(size) = self.thread_stack_size {
            ensure!(
                size >= MIN_STACK_SIZE,
                "thread_stack_size ({}) is below the {} bytes minimum",
                size,
                MIN_STACK_SIZE
            );
        }

        Ok(())
    }

    pub(crate) fn max_workers(&self, qos: Qos) -> usize {
        self.max_workers[qos.index()]
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let default_workers = match builder.max_workers {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let mut max_workers = [default_workers; Qos::COUNT];
        for qos in Qos::ALL {
            if let Some(n) = builder.max_workers_for[qos.index()] {
                max_workers[qos.index()] = n;
            }
        }

        let cfg = RuntimeConfig {
            max_workers,
            idle_timeout: builder.idle_timeout,
            shutdown_timeout: builder.shutdown_timeout,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            thread_group_classes: builder.thread_group_classes,
            timer_slack: builder.timer_slack,
            qos_service: builder.qos_service,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    // Cloned into every worker thread.
    assert_impl_all!(RuntimeConfig: Send, Sync, Clone);
    assert_impl_all!(Builder: Send);

    #[test]
    fn test_per_class_override() -> Result<()> {
        let cfg = RuntimeConfig::try_from(
            Builder::new()
                .max_workers(3)
                .max_workers_for(Qos::Background, 1),
        )?;

        assert_eq!(cfg.max_workers(Qos::Background), 1);
        assert_eq!(cfg.max_workers(Qos::Default), 3);
        assert_eq!(cfg.max_workers(Qos::UserInteractive), 3);
        assert_eq!(cfg.idle_timeout, IDLE_TIMEOUT);
        Ok(())
    }

    #[test]
    fn test_default_workers_follow_parallelism() -> Result<()> {
        let cfg = RuntimeConfig::try_from(Builder::new())?;
        let cores = thread::available_parallelism()?.get();

        assert!(cfg.max_workers.iter().all(|n| *n == cores));
        assert!(cfg.thread_group_classes.contains_qos(Qos::DeadlineRequest));
        Ok(())
    }

    #[test]
    fn test_tiny_stack_rejected() {
        let res = RuntimeConfig::try_from(Builder::new().thread_stack_size(4096));
        assert!(res.is_err());
    }

    #[test]
    fn test_thread_name_fn_is_monotonic() {
        let f = default_thread_name_fn();
        assert_eq!(f.0(), "taskolo-0");
        assert_eq!(f.0(), "taskolo-1");
    }

    #[test]
    #[should_panic(expected = "max_workers must be greater than 0")]
    fn test_zero_workers_rejected() {
        let _ = Builder::new().max_workers(0);
    }
}
