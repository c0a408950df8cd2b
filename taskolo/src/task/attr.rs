use crate::qos::Qos;
use std::time::Duration;

/// Optional submission attributes.
///
/// ```no_run
/// use std::time::Duration;
/// use taskolo::{Qos, TaskAttr};
///
/// let attr = TaskAttr::new()
///     .name("refresh-cache")
///     .qos(Qos::Utility)
///     .delay(Duration::from_millis(20));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskAttr {
    pub(crate) name: Option<String>,

    /// `None` inherits the class of the submitting task, or `Qos::Default`
    /// outside of tasks.
    pub(crate) qos: Option<Qos>,
    pub(crate) delay: Duration,
}

impl TaskAttr {
    pub fn new() -> TaskAttr {
        TaskAttr::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn qos(mut self, qos: Qos) -> Self {
        self.qos = Some(qos);
        self
    }

    /// The task becomes eligible only once `delay` has elapsed. Delayed
    /// tasks ignore dependency lists.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get_qos(&self) -> Option<Qos> {
        self.qos
    }

    pub fn get_delay(&self) -> Duration {
        self.delay
    }
}

impl From<Qos> for TaskAttr {
    fn from(qos: Qos) -> Self {
        TaskAttr::new().qos(qos)
    }
}
