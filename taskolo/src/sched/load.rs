use crate::sched::TaskSwitchState;
use std::time::{Duration, Instant};

/// Number of samples an estimator averages over.
const LOAD_WINDOW: usize = 4;

/// Rolling mean of the last few load samples, in nanoseconds.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadEstimator {
    samples: [u64; LOAD_WINDOW],
    next: usize,
    len: usize,
}

impl LoadEstimator {
    pub(crate) fn update_load(&mut self, load: u64) {
        self.samples[self.next] = load;
        self.next = (self.next + 1) % LOAD_WINDOW;
        self.len = (self.len + 1).min(LOAD_WINDOW);
    }

    /// Zero until the first sample.
    pub(crate) fn predict_load(&self) -> u64 {
        if self.len == 0 {
            return 0;
        }

        let sum: u128 = self.samples[..self.len].iter().map(|s| *s as u128).sum();
        (sum / self.len as u128) as u64
    }
}

/// Predicts the load of a whole window and of what is left of it after each
/// checkpoint.
#[derive(Debug, Clone, Default)]
pub(crate) struct IntervalLoadPredictor {
    total: LoadEstimator,

    /// One estimator per checkpoint position within a window.
    checkpoints: Vec<LoadEstimator>,
    cp_index: usize,
}

impl IntervalLoadPredictor {
    pub(crate) fn update_total_load(&mut self, load: u64) {
        self.total.update_load(load);
    }

    pub(crate) fn total_load(&self) -> u64 {
        self.total.predict_load()
    }

    pub(crate) fn reset_cp_index(&mut self) {
        self.cp_index = 0;
    }

    /// Predicted load still ahead at the current checkpoint. Zero when this
    /// checkpoint has no history.
    pub(crate) fn cp_load(&self) -> u64 {
        let done = self
            .checkpoints
            .get(self.cp_index)
            .map_or(0, LoadEstimator::predict_load);

        if done == 0 {
            return 0;
        }

        self.total_load().saturating_sub(done)
    }

    /// Records the load observed up to the current checkpoint and moves to
    /// the next one.
    pub(crate) fn update_cp_load(&mut self, load: u64) {
        if self.cp_index >= self.checkpoints.len() {
            self.checkpoints.resize_with(self.cp_index + 1, LoadEstimator::default);
        }

        self.checkpoints[self.cp_index].update_load(load);
        self.cp_index += 1;
    }
}

/// Measures the load of the current window.
///
/// Without task switch records the whole elapsed window counts as load.
/// Once switches are recorded only the time between `Begin` and `End` does.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadTracker {
    window_start: Option<Instant>,
    busy_since: Option<Instant>,
    busy: Duration,
    switched: bool,
}

impl LoadTracker {
    pub(crate) fn begin(&mut self) {
        *self = LoadTracker {
            window_start: Some(Instant::now()),
            ..LoadTracker::default()
        };
    }

    pub(crate) fn end(&mut self) {
        self.window_start = None;
        self.busy_since = None;
    }

    pub(crate) fn record(&mut self, state: TaskSwitchState) {
        let now = Instant::now();
        self.switched = true;

        if let Some(since) = self.busy_since.take() {
            self.busy += now.saturating_duration_since(since);
        }

        if matches!(state, TaskSwitchState::Begin | TaskSwitchState::Update) {
            self.busy_since = Some(now);
        }
    }

    /// Load observed so far in the window, in nanoseconds.
    pub(crate) fn load(&self) -> u64 {
        let load = if self.switched {
            self.busy + self.busy_since.map_or(Duration::ZERO, |s| s.elapsed())
        } else {
            self.window_start.map_or(Duration::ZERO, |s| s.elapsed())
        };

        u64::try_from(load.as_nanos()).unwrap_or(u64::MAX)
    }
}
