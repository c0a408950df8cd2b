use std::time::{Duration, Instant};

/// Target period of an interval, and the absolute end of the current window.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    ns: u64,
    abs: Instant,
}

impl Deadline {
    pub(crate) fn new(deadline: Duration) -> Deadline {
        let mut ddl = Deadline {
            ns: 1,
            abs: Instant::now(),
        };
        ddl.update(deadline);
        ddl
    }

    /// Rewrites the period and restarts the window from now. A zero period
    /// is treated as 1 ns.
    pub(crate) fn update(&mut self, deadline: Duration) {
        self.ns = u64::try_from(deadline.as_nanos()).unwrap_or(u64::MAX).max(1);
        self.restart();
    }

    pub(crate) fn restart(&mut self) {
        self.abs = Instant::now() + Duration::from_nanos(self.ns);
    }

    pub(crate) fn to_ns(&self) -> u64 {
        self.ns
    }

    /// Time left in the current window, zero once it is over.
    pub(crate) fn left_ns(&self) -> u64 {
        let left = self.abs.saturating_duration_since(Instant::now());
        u64::try_from(left.as_nanos()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_deadline_clamped() {
        let ddl = Deadline::new(Duration::ZERO);
        assert_eq!(ddl.to_ns(), 1);
    }

    #[test]
    fn test_left_shrinks_then_saturates() {
        let mut ddl = Deadline::new(Duration::from_millis(20));
        assert_eq!(ddl.to_ns(), 20_000_000);
        assert!(ddl.left_ns() <= 20_000_000);

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(ddl.left_ns(), 0);

        ddl.update(Duration::from_secs(1));
        assert!(ddl.left_ns() > 900_000_000);
    }
}
