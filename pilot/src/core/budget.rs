//! Wall-clock budget for waiting on CI.

use std::time::Duration;

/// Tracks how long we have waited for a build, in whole poll intervals.
///
/// Elapsed time advances by exactly one interval per poll, so the number of
/// polls is deterministic: `ceil(max_wait / interval)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    interval: Duration,
    max_wait: Duration,
    elapsed: Duration,
}

impl WaitBudget {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval,
            max_wait,
            elapsed: Duration::ZERO,
        }
    }

    /// True while another poll fits in the budget.
    pub fn has_remaining(&self) -> bool {
        self.elapsed < self.max_wait
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Record one interval of waiting.
    pub fn advance(&mut self) {
        self.elapsed = self.elapsed.saturating_add(self.interval);
    }
}
