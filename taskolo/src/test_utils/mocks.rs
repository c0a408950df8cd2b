use crate::deps::{self, Token};
use crate::qos::Qos;
use crate::runtime::TaskOpts;
use crate::sys::{GroupId, QosService, Tid};
use crate::task::{Payload, Task, TaskBuilder};
use crate::test_utils::{Call, Method, Tracker};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

/// A detached task of the default class without dependencies.
pub(crate) fn mock_task(payload: Payload) -> Task {
    TaskBuilder {
        qos: Qos::Default,
        name: None,
        opts: TaskOpts::DETACHED,
        ins: deps::normalize(&[]),
        outs: deps::normalize(&[]),
    }
    .build(payload)
}

pub(crate) fn mock_task_with(qos: Qos, ins: &[Token], outs: &[Token], opts: TaskOpts) -> Task {
    TaskBuilder {
        qos,
        name: None,
        opts,
        ins: deps::normalize(ins),
        outs: deps::normalize(outs),
    }
    .build(Box::new(|| {}))
}

/// Counts how many of its guards were dropped.
#[derive(Debug, Clone, Default)]
pub(crate) struct DropCounter {
    dropped: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub(crate) struct DropGuard {
    dropped: Arc<AtomicUsize>,
}

impl DropCounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn guard(&self) -> DropGuard {
        DropGuard {
            dropped: Arc::clone(&self.dropped),
        }
    }

    pub(crate) fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Acquire)
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::AcqRel);
    }
}

/// A [`QosService`] that records every request in a [`Tracker`].
#[derive(Debug, Default)]
pub(crate) struct RecordingQosService {
    pub(crate) tracker: Tracker,
    next_group: AtomicI32,
    busy: AtomicBool,
    fail_create: AtomicBool,
}

impl RecordingQosService {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }

    pub(crate) fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Release);
    }

    pub(crate) fn num_calls(&self, method: Method) -> usize {
        self.tracker.num_calls(&method)
    }

    pub(crate) fn get_calls(&self, method: Method) -> Vec<Call> {
        self.tracker.get_calls(&method)
    }
}

impl QosService for RecordingQosService {
    fn apply_qos(&self, qos: Qos) -> io::Result<()> {
        self.tracker.record(Method::ApplyQos, Call::ApplyQos { qos });
        Ok(())
    }

    fn leave_qos(&self) -> io::Result<()> {
        self.tracker.record(Method::LeaveQos, Call::LeaveQos);
        Ok(())
    }

    fn create_thread_group(&self, qos: Qos) -> io::Result<GroupId> {
        if self.fail_create.load(Ordering::Acquire) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }

        let group = GroupId(self.next_group.fetch_add(1, Ordering::Relaxed) + 1);
        self.tracker
            .record(Method::CreateGroup, Call::CreateGroup { qos, group });
        Ok(group)
    }

    fn destroy_thread_group(&self, group: GroupId) -> io::Result<()> {
        self.tracker
            .record(Method::DestroyGroup, Call::DestroyGroup { group });
        Ok(())
    }

    fn join_thread_group(&self, group: GroupId, tid: Tid) -> io::Result<()> {
        self.tracker
            .record(Method::JoinGroup, Call::JoinGroup { group, tid });
        Ok(())
    }

    fn leave_thread_group(&self, group: GroupId, tid: Tid) -> io::Result<()> {
        self.tracker
            .record(Method::LeaveGroup, Call::LeaveGroup { group, tid });
        Ok(())
    }

    fn set_utilization_hint(&self, group: Option<GroupId>, util: u64) -> io::Result<()> {
        self.tracker.record(
            Method::UtilizationHint,
            Call::UtilizationHint { group, util },
        );
        Ok(())
    }

    fn is_busy(&self, _group: Option<GroupId>) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}
