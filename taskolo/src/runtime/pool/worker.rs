use crate::context;
use crate::qos::Qos;
use crate::runtime::Handle;
use crate::runtime::pool::{TaskNotify, WorkerAction};
use crate::sys;
use crate::task::{Notified, TaskGuard};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

pub(super) fn spawn(handle: Handle, qos: Qos) -> io::Result<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name((handle.cfg.thread_name.0)());

    if let Some(stack_size) = handle.cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder.spawn(move || Worker { handle, qos }.run())
}

/// A thread serving a single priority class.
struct Worker {
    handle: Handle,
    qos: Qos,
}

impl Worker {
    fn run(self) {
        let _enter = context::enter(self.handle.clone());
        let _worker = context::enter_worker(self.qos);

        let group = self.handle.pool.group(self.qos);
        let svc = self.handle.cfg.qos_service.as_ref();

        sys::log_failure("apply_qos", svc.apply_qos(self.qos));
        group.register_member(svc);
        tracing::info!(qos = %self.qos, "worker started");

        loop {
            if let Some(task) = self.handle.pick_next_task(self.qos) {
                // Someone else may have to take over the rest of the backlog.
                self.handle.notify(self.qos, TaskNotify::Picked);
                self.execute(task);
                continue;
            }

            if group.idle_action(&self.handle) == WorkerAction::Retire {
                break;
            }
        }

        group.unregister_member(svc);
        sys::log_failure("leave_qos", svc.leave_qos());
        tracing::info!(qos = %self.qos, "worker retired");
    }

    fn execute(&self, task: Notified) {
        let task = task.into_task();

        if task.transition_to_running() {
            let span = tracing::trace_span!(
                "task",
                id = task.id().as_u64(),
                qos = %task.qos(),
                name = task.name().unwrap_or_default(),
                tag = tracing::field::Empty,
            );
            let _span = span.enter();
            tracing::debug!("task dispatched");

            {
                let _guard = TaskGuard::enter(task.clone());

                if let Some(payload) = task.take_payload()
                    && let Err(panic) = panic::catch_unwind(AssertUnwindSafe(payload))
                {
                    tracing::error!(panic = panic_message(&*panic), "task panicked");
                }
            }

            if let Some(tag) = task.trace_tag() {
                span.record("tag", tag.as_str());
            }

            task.transition_to_finished();

            // The payload moved itself to another class, take ours back.
            if task.qos() != self.qos {
                sys::log_failure("apply_qos", self.handle.cfg.qos_service.apply_qos(self.qos));
            }
        } else {
            tracing::debug!(id = %task.id(), state = %task.state(), "task released without running");
            drop(task.take_payload());
        }

        self.handle.complete(&task);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
