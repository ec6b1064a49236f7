// Exponential-backoff retry decorator
//
// Composes with the circuit breaker in either order, chosen at the call
// site:
// - retry outside the breaker: each attempt is separately accounted by the
//   breaker (and fails fast once it opens)
// - retry inside the breaker: the breaker sees one failure only after all
//   attempts are exhausted
//
// The baseline schedule has no jitter, and the last error is re-raised
// unchanged so breaker accounting sees the original failure.

use std::future::Future;
use std::time::Duration;

/// Retry policy with exponential backoff between attempts
///
/// Sleeps `initial_delay * backoff_multiplier^(attempt - 1)` after the
/// attempt numbered `attempt` (1-based) fails.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each further failure
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given number of attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Set the delay after the first failed attempt
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// The sleep inserted after the given (1-based) attempt fails
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor)
    }

    /// Run `op` until it succeeds or attempts are exhausted
    ///
    /// On exhaustion the last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    let delay = self.delay_after_attempt(attempt);
                    tracing::debug!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
