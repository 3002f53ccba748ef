//! Consecutive-failure tracking and suspension escalation.

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::registry::PrincipalEntry;

/// What the engine must do after a recorded failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerAction {
    /// Below the limit; the principal may be challenged again.
    AllowFutureChallenge { failures: u32 },
    /// Limit reached; ban and schedule the lift.
    Suspend { failures: u32 },
}

/// Counts consecutive failed sessions against a retry limit.
#[derive(Clone, Copy, Debug)]
pub struct RetryTracker {
    limit: u32,
}

impl RetryTracker {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Increment the principal's failure count and decide the escalation.
    pub fn record_failure(&self, entry: &mut PrincipalEntry) -> TrackerAction {
        let failures = entry.increment_failures();
        if failures >= self.limit {
            TrackerAction::Suspend { failures }
        } else {
            TrackerAction::AllowFutureChallenge { failures }
        }
    }
}

/// A scheduled suspension lift. Not cancellable; dropping the record
/// detaches the task rather than stopping it.
#[derive(Debug)]
pub struct SuspensionTimer {
    until: Instant,
    task: JoinHandle<()>,
}

impl SuspensionTimer {
    pub fn new(until: Instant, task: JoinHandle<()>) -> Self {
        Self { until, task }
    }

    /// When the suspension lifts.
    pub fn until(&self) -> Instant {
        self.until
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
