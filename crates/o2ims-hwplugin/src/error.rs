use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin rejected the request (4xx). Not retryable.
    #[error("hardware plugin rejected the request ({status}): {message}")]
    Request { status: u16, message: String },

    /// The plugin or the network failed (5xx, connect/timeout). Retryable.
    #[error("hardware plugin unavailable: {0}")]
    Unavailable(String),

    #[error("hardware plugin response did not decode: {0}")]
    Decode(String),

    #[error("allocation '{0}' is not known to the plugin")]
    UnknownAllocation(String),

    #[error("no hardware plugin registered for '{0}'")]
    NotConfigured(String),

    #[error("internal plugin error: {0}")]
    Internal(String),
}

impl PluginError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PluginError::Unavailable(_))
    }
}

const RETRY_FLOOR_SECS: u64 = 15;
const RETRY_CEILING_SECS: u64 = 120;

/// Backoff for transient plugin failures: 15s doubling per consecutive
/// attempt, clamped to two minutes.
pub fn retry_interval(attempt: u32) -> Duration {
    let secs = RETRY_FLOOR_SECS
        .saturating_mul(1u64 << attempt.min(6))
        .min(RETRY_CEILING_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_interval_doubles_within_bounds() {
        assert_eq!(retry_interval(0), Duration::from_secs(15));
        assert_eq!(retry_interval(1), Duration::from_secs(30));
        assert_eq!(retry_interval(2), Duration::from_secs(60));
        assert_eq!(retry_interval(3), Duration::from_secs(120));
        assert_eq!(retry_interval(30), Duration::from_secs(120));
    }
}
