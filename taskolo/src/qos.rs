use bitflags::bitflags;
use std::fmt;

/// Priority class of a task.
///
/// Each class owns an independent ready queue and worker allotment, so a busy
/// class never starves another one. Classes are ordered from the least to the
/// most latency sensitive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Qos {
    Background = 0,
    Utility = 1,
    #[default]
    Default = 2,
    UserInitiated = 3,
    DeadlineRequest = 4,
    UserInteractive = 5,
}

impl Qos {
    pub const COUNT: usize = 6;

    pub const ALL: [Qos; Qos::COUNT] = [
        Qos::Background,
        Qos::Utility,
        Qos::Default,
        Qos::UserInitiated,
        Qos::DeadlineRequest,
        Qos::UserInteractive,
    ];

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub(crate) fn from_u8(val: u8) -> Option<Qos> {
        Qos::ALL.get(val as usize).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Qos::Background => "background",
            Qos::Utility => "utility",
            Qos::Default => "default",
            Qos::UserInitiated => "user_initiated",
            Qos::DeadlineRequest => "deadline_request",
            Qos::UserInteractive => "user_interactive",
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Set of priority classes, used for per-class configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QosMask: u8 {
        const BACKGROUND = 1 << 0;
        const UTILITY = 1 << 1;
        const DEFAULT = 1 << 2;
        const USER_INITIATED = 1 << 3;
        const DEADLINE_REQUEST = 1 << 4;
        const USER_INTERACTIVE = 1 << 5;
    }
}

impl QosMask {
    pub fn contains_qos(&self, qos: Qos) -> bool {
        self.contains(QosMask::from(qos))
    }
}

impl From<Qos> for QosMask {
    fn from(qos: Qos) -> Self {
        QosMask::from_bits_truncate(1 << qos.index())
    }
}
