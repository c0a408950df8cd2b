use crate::qos::Qos;
use crate::runtime::Schedule;
use crate::sys::{GroupId, Tid};
use crate::task::{Id, Notified};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records every task handed to it instead of running it.
#[derive(Debug, Default)]
pub(crate) struct SpyScheduler {
    scheduled: Mutex<Vec<Notified>>,
}

impl SpyScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Ids of the scheduled tasks, in scheduling order.
    pub(crate) fn scheduled(&self) -> Vec<Id> {
        self.scheduled.lock().iter().map(Notified::id).collect()
    }

    pub(crate) fn count(&self, id: Id) -> usize {
        self.scheduled.lock().iter().filter(|n| n.id() == id).count()
    }

    /// Drops the recorded tasks.
    pub(crate) fn clear(&self) {
        self.scheduled.lock().clear();
    }
}

impl Schedule for SpyScheduler {
    fn schedule(&self, task: Notified) {
        self.scheduled.lock().push(task);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    ApplyQos,
    LeaveQos,
    CreateGroup,
    DestroyGroup,
    JoinGroup,
    LeaveGroup,
    UtilizationHint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    ApplyQos { qos: Qos },
    LeaveQos,
    CreateGroup { qos: Qos, group: GroupId },
    DestroyGroup { group: GroupId },
    JoinGroup { group: GroupId, tid: Tid },
    LeaveGroup { group: GroupId, tid: Tid },
    UtilizationHint { group: Option<GroupId>, util: u64 },
}

/// Call log shared between a recording service and the test inspecting it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls.entry(method).or_default().push(call);
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .map(|calls| calls.value().clone())
            .unwrap_or_default()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }
}
