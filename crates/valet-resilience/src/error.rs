// Error types for breaker-guarded calls

use std::time::Duration;
use thiserror::Error;

/// Result type alias for breaker-guarded operations
pub type Result<T> = std::result::Result<T, BreakerError>;

/// Errors surfaced by a breaker-guarded call
///
/// The breaker never swallows failures: an upstream error is recorded and
/// then re-raised unchanged inside `Upstream`. `CircuitOpen` is the only
/// variant for which the wrapped operation did not execute at all.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The circuit is open; the wrapped operation was never invoked
    #[error("circuit '{dependency}' is open, retry in {}s", retry_after.as_secs())]
    CircuitOpen {
        dependency: String,
        retry_after: Duration,
    },

    /// The wrapped operation exceeded its per-call timeout
    ///
    /// Counted as a failure for breaker accounting, but surfaced as a
    /// distinct kind so callers can retry with a longer timeout.
    #[error("call to '{dependency}' timed out after {}ms", timeout.as_millis())]
    Timeout {
        dependency: String,
        timeout: Duration,
    },

    /// The wrapped operation failed; the original error, unchanged
    #[error("upstream call failed: {0}")]
    Upstream(#[from] anyhow::Error),
}

impl BreakerError {
    /// Create a circuit-open error
    pub fn circuit_open(dependency: impl Into<String>, retry_after: Duration) -> Self {
        BreakerError::CircuitOpen {
            dependency: dependency.into(),
            retry_after,
        }
    }

    /// Create a timeout error
    pub fn timeout(dependency: impl Into<String>, timeout: Duration) -> Self {
        BreakerError::Timeout {
            dependency: dependency.into(),
            timeout,
        }
    }

    /// True if the call was rejected without executing
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen { .. })
    }

    /// True if the call failed on its per-call timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout { .. })
    }
}
