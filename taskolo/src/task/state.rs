use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a task.
///
/// ```text
/// Created ──> Blocked ──> Ready ──> Running ──> Finished
///    │           │          │
///    └───────────┴──────────┴──> Skipped | Canceled
/// ```
///
/// Transitions only move forward, a state is never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    Created = 0,
    Blocked = 1,
    Ready = 2,
    Running = 3,
    Finished = 4,
    Skipped = 5,
    Canceled = 6,
}

impl State {
    fn from_u8(val: u8) -> State {
        match val {
            0 => State::Created,
            1 => State::Blocked,
            2 => State::Ready,
            3 => State::Running,
            4 => State::Finished,
            5 => State::Skipped,
            6 => State::Canceled,
            _ => unreachable!("invalid task state {}", val),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Finished | State::Skipped | State::Canceled)
    }

    /// The payload has not been picked up by a worker yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, State::Created | State::Blocked | State::Ready)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new() -> Self {
        AtomicState(AtomicU8::new(State::Created as u8))
    }

    pub(crate) fn load(&self) -> State {
        State::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition<F>(&self, f: F) -> Result<State, State>
    where
        F: Fn(State) -> Option<State>,
    {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |curr| {
                f(State::from_u8(curr)).map(|next| next as u8)
            })
            .map(State::from_u8)
            .map_err(State::from_u8)
    }

    /// Only called by the dependency graph while registering the task.
    #[track_caller]
    pub(crate) fn transition_to_blocked(&self) {
        let res = self.transition(|s| (s == State::Created).then_some(State::Blocked));
        assert!(res.is_ok(), "task must be blocked right after creation");
    }

    /// Returns `false` if the task escaped through skip or cancel in the
    /// meantime. The caller still hands it to a worker so its tokens get
    /// signaled.
    pub(crate) fn transition_to_ready(&self) -> bool {
        self.transition(|s| matches!(s, State::Created | State::Blocked).then_some(State::Ready))
            .is_ok()
    }

    pub(crate) fn transition_to_running(&self) -> bool {
        self.transition(|s| (s == State::Ready).then_some(State::Running))
            .is_ok()
    }

    #[track_caller]
    pub(crate) fn transition_to_finished(&self) {
        let res = self.transition(|s| (s == State::Running).then_some(State::Finished));
        assert!(res.is_ok(), "only a running task can finish");
    }

    /// On failure returns the state that prevented the skip.
    pub(crate) fn skip(&self) -> Result<(), State> {
        self.transition(|s| s.is_pending().then_some(State::Skipped))
            .map(|_| ())
    }

    /// Cancellation only applies to tasks that never reached a worker, a
    /// running payload always runs to completion.
    pub(crate) fn cancel(&self) -> bool {
        self.transition(|s| s.is_pending().then_some(State::Canceled))
            .is_ok()
    }
}

impl fmt::Debug for AtomicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicState").field(&self.load()).finish()
    }
}
