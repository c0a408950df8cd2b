//! Submission and waiting entry points.
//!
//! The free functions use the runtime entered on the calling thread. Workers
//! and [`Runtime::block_on`](crate::Runtime::block_on) always have one,
//! elsewhere they fail with [`Error::NoRuntime`].
use crate::context;
use crate::deps::{self, Token, TokenList};
use crate::error::{Error, Result};
use crate::runtime::{Handle, TaskOpts};
use crate::task::{Payload, TaskAttr, TaskBuilder, TaskHandle};
use crate::utils::ScopeGuard;
use smallvec::smallvec;
use std::time::Duration;

/// Submits `f` with default attributes and no dependencies.
pub fn submit<F>(f: F) -> Result<TaskHandle>
where
    F: FnOnce() + Send + 'static,
{
    context::current()?.submit(f)
}

/// Submits `f`, runnable once every producer of `ins` submitted before it has
/// completed. Each token in `outs` gets one more producer until the task
/// completes.
///
/// # Example
///
/// ```no_run
/// use taskolo::{Qos, TaskAttr, Token};
///
/// # fn doc() -> taskolo::Result<()> {
/// let x = Token::new();
/// taskolo::submit_with(|| println!("produce"), &[], &[x], TaskAttr::new())?;
/// taskolo::submit_with(|| println!("consume"), &[x], &[], Qos::Utility.into())?;
/// taskolo::wait_all()?;
/// # Ok(())
/// # }
/// ```
pub fn submit_with<F>(f: F, ins: &[Token], outs: &[Token], attr: TaskAttr) -> Result<TaskHandle>
where
    F: FnOnce() + Send + 'static,
{
    context::current()?.submit_with(f, ins, outs, attr)
}

/// Blocks until every producer of `tokens` submitted so far has completed.
pub fn wait(tokens: &[Token]) -> Result<()> {
    context::current()?.wait(tokens)
}

/// Blocks until every task submitted from the calling task, or from the
/// calling thread outside of tasks, has completed.
pub fn wait_all() -> Result<()> {
    context::current()?.wait_all()
}

/// Same as [`TaskHandle::skip`].
pub fn skip(handle: &TaskHandle) -> Result<()> {
    handle.skip()
}

impl Handle {
    pub fn submit<F>(&self, f: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_with(f, &[], &[], TaskAttr::default())
    }

    pub fn submit_with<F>(
        &self,
        f: F,
        ins: &[Token],
        outs: &[Token],
        attr: TaskAttr,
    ) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_inner(Box::new(f), ins, outs, attr, TaskOpts::empty())
    }

    pub(crate) fn submit_inner(
        &self,
        payload: Payload,
        ins: &[Token],
        outs: &[Token],
        attr: TaskAttr,
        opts: TaskOpts,
    ) -> Result<TaskHandle> {
        if self.is_shutdown() {
            return Err(Error::ShuttingDown);
        }

        let qos = attr
            .qos
            .or_else(|| context::current_task().map(|task| task.qos()))
            .unwrap_or_default();

        let (ins, outs) = if attr.delay.is_zero() {
            let ins = deps::normalize(ins);
            let outs = deps::normalize(outs);
            deps::validate(&ins, &outs)?;
            (ins, outs)
        } else {
            if !ins.is_empty() || !outs.is_empty() {
                tracing::warn!(delay = ?attr.delay, "dependencies of a delayed task are ignored");
            }

            (smallvec![self.arm_delay(attr.delay)?], TokenList::new())
        };

        let task = TaskBuilder {
            qos,
            name: attr.name,
            opts,
            ins,
            outs,
        }
        .build(payload);

        tracing::trace!(id = %task.id(), %qos, ins = task.ins().len(), "task submitted");
        self.graph.submit(task.clone(), self);

        Ok(TaskHandle::new(task, self.clone()))
    }

    /// Opens a gate token released once `delay` elapsed, or as soon as the
    /// timer is torn down.
    fn arm_delay(&self, delay: Duration) -> Result<Token> {
        let gate = Token::new();
        let producer = self.graph.add_producer(gate);

        let handle = self.clone();
        let release = ScopeGuard::new(move || handle.graph.signal(producer, &[gate], &handle));

        self.timer.schedule_after(delay, Box::new(move || drop(release)))?;

        Ok(gate)
    }

    /// Blocks until every producer of `tokens` submitted before the call
    /// completed. Producers submitted afterwards are not waited for.
    ///
    /// Called from a worker of this runtime, the worker stops counting toward
    /// its class allotment until it returns.
    pub fn wait(&self, tokens: &[Token]) -> Result<()> {
        if let Some(group) = self.graph.wait_handle(tokens) {
            self.block_in_place(|| group.wait());
        }

        Ok(())
    }

    /// Blocks until everything submitted from the calling context completed.
    pub fn wait_all(&self) -> Result<()> {
        let group = context::wait_group();
        self.block_in_place(|| group.wait());

        Ok(())
    }
}
