use crate::context;
use crate::deps::{Token, TokenList, WaitGroup};
use crate::qos::Qos;
use crate::runtime::TaskOpts;
use crate::task::Id;
use crate::task::state::{AtomicState, State};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// The closure run by a task. Dropping it is the task's destroy routine.
pub(crate) type Payload = Box<dyn FnOnce() + Send + 'static>;

/// Shared state of a task. Lives as long as any [`Task`] reference does.
pub(crate) struct Core {
    id: Id,
    qos: AtomicU8,
    name: Option<String>,
    state: AtomicState,

    /// Taken exactly once, by the worker running the task or by skip/cancel.
    payload: Mutex<Option<Payload>>,

    /// Private token signaled on completion, lets callers wait on the task
    /// or depend on it through its handle.
    token: Token,
    ins: TokenList,
    outs: TokenList,

    /// Input tokens still waiting on a producer. Only mutated under the
    /// dependency graph lock.
    pub(crate) pending_deps: AtomicUsize,

    /// Set once the task reached a terminal state, before its tokens are
    /// released.
    done: AtomicBool,
    trace_tag: Mutex<Option<String>>,

    /// Outstanding-work counter of whoever submitted this task.
    parent: Option<Arc<WaitGroup>>,

    /// Outstanding work submitted by this task while it runs.
    children: Arc<WaitGroup>,
}

/// An owned reference to a task.
///
/// Every hand-off point holds one: the submitter's handle, the dependency
/// graph while blocked, the ready queue while queued and the worker while
/// running. Storage is released when the last one drops.
#[derive(Clone)]
pub(crate) struct Task(Arc<Core>);

pub(crate) struct TaskBuilder {
    pub(crate) qos: Qos,
    pub(crate) name: Option<String>,
    pub(crate) opts: TaskOpts,
    pub(crate) ins: TokenList,
    pub(crate) outs: TokenList,
}

impl TaskBuilder {
    /// Registers the task with the submitter's wait group and returns it in
    /// the `Created` state.
    pub(crate) fn build(self, payload: Payload) -> Task {
        let token = Token::new();
        let mut outs = self.outs;
        outs.push(token);

        let parent = if self.opts.contains(TaskOpts::DETACHED) {
            None
        } else {
            let group = context::wait_group();
            group.add();
            Some(group)
        };

        Task(Arc::new(Core {
            id: Id::next(),
            qos: AtomicU8::new(self.qos as u8),
            name: self.name,
            state: AtomicState::new(),
            payload: Mutex::new(Some(payload)),
            token,
            ins: self.ins,
            outs,
            pending_deps: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            trace_tag: Mutex::new(None),
            parent,
            children: Arc::new(WaitGroup::new()),
        }))
    }
}

impl Task {
    pub(crate) fn id(&self) -> Id {
        self.0.id
    }

    pub(crate) fn qos(&self) -> Qos {
        Qos::from_u8(self.0.qos.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub(crate) fn set_qos(&self, qos: Qos) {
        self.0.qos.store(qos as u8, Ordering::Relaxed);
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub(crate) fn token(&self) -> Token {
        self.0.token
    }

    pub(crate) fn ins(&self) -> &[Token] {
        &self.0.ins
    }

    /// Includes the task's own token.
    pub(crate) fn outs(&self) -> &[Token] {
        &self.0.outs
    }

    pub(crate) fn children(&self) -> &Arc<WaitGroup> {
        &self.0.children
    }

    pub(crate) fn take_payload(&self) -> Option<Payload> {
        self.0.payload.lock().take()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.0.done.load(Ordering::Acquire)
    }

    pub(crate) fn trace_tag(&self) -> Option<String> {
        self.0.trace_tag.lock().clone()
    }

    pub(crate) fn set_trace_tag(&self, tag: Option<String>) {
        *self.0.trace_tag.lock() = tag;
    }

    /// Marks the task done, right before its tokens are signaled.
    pub(crate) fn mark_done(&self) {
        let was_done = self.0.done.swap(true, Ordering::AcqRel);
        debug_assert!(!was_done, "task {} completed twice", self.id());
    }

    pub(crate) fn release_parent(&self) {
        if let Some(parent) = &self.0.parent {
            parent.done();
        }
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Deref for Task {
    type Target = Core;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Core {
    pub(crate) fn state(&self) -> State {
        self.state.load()
    }

    pub(crate) fn transition_to_blocked(&self) {
        self.state.transition_to_blocked()
    }

    pub(crate) fn transition_to_ready(&self) -> bool {
        self.state.transition_to_ready()
    }

    pub(crate) fn transition_to_running(&self) -> bool {
        self.state.transition_to_running()
    }

    pub(crate) fn transition_to_finished(&self) {
        self.state.transition_to_finished()
    }

    pub(crate) fn skip(&self) -> Result<(), State> {
        self.state.skip()
    }

    pub(crate) fn cancel(&self) -> bool {
        self.state.cancel()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("qos", &self.qos())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// A task that was handed to a ready queue.
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct Notified(Task);

impl Notified {
    pub(crate) fn new(task: Task) -> Notified {
        Notified(task)
    }

    pub(crate) fn id(&self) -> Id {
        self.0.id()
    }

    pub(crate) fn qos(&self) -> Qos {
        self.0.qos()
    }

    pub(crate) fn into_task(self) -> Task {
        self.0
    }
}

/// Installs a task as the current task of this thread while its payload runs,
/// restoring the previous one on drop.
pub(crate) struct TaskGuard {
    parent: Option<Task>,
}

impl TaskGuard {
    pub(crate) fn enter(task: Task) -> Self {
        TaskGuard {
            parent: context::set_current_task(Some(task)),
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        context::set_current_task(self.parent.take());
    }
}
