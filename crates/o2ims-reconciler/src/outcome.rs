use std::time::Duration;

/// Plugin-retry floor; also the short poll interval.
pub const SHORT_INTERVAL: Duration = Duration::from_secs(15);

/// The standard interval while a downstream system converges.
pub const MEDIUM_INTERVAL: Duration = Duration::from_secs(60);

/// What the caller should do after a reconcile returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    /// No timed requeue; watches drive the next reconcile.
    pub fn done() -> Self {
        Action { requeue_after: None }
    }

    pub fn requeue_after(interval: Duration) -> Self {
        Action { requeue_after: Some(interval) }
    }

    pub fn requeue_medium() -> Self {
        Self::requeue_after(MEDIUM_INTERVAL)
    }
}
