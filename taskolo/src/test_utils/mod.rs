use crate::runtime::{Builder, Runtime};
use anyhow::Result;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

// Exports
pub(crate) mod mocks;
pub(crate) use mocks::{DropCounter, RecordingQosService, mock_task, mock_task_with};

pub(crate) mod spy;
pub(crate) use spy::{Call, Method, SpyScheduler, Tracker};

/// Installs a test-writer subscriber once per test binary. Filter with
/// `RUST_LOG`.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Small runtime wired to a recording scheduling service.
#[must_use]
pub(crate) fn init_runtime(
    max_workers: usize,
    builder: Option<Builder>,
) -> Result<(Runtime, Arc<RecordingQosService>)> {
    init_tracing();

    let svc = RecordingQosService::new();
    let runtime = builder
        .unwrap_or_default()
        .max_workers(max_workers)
        .idle_timeout(Duration::from_millis(200))
        .shutdown_timeout(Duration::from_secs(5))
        .qos_service(svc.clone())
        .try_build()?;

    Ok((runtime, svc))
}

/// Polls `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    cond()
}
