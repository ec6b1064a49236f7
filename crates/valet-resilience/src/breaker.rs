// Per-dependency circuit breaker
//
// State machine:
// - Closed: calls pass through; failures increment a counter, a success
//   resets it; reaching the threshold opens the circuit
// - Open: calls fail fast with CircuitOpen; after the cooldown elapses the
//   next state read transitions to HalfOpen (lazy, no background task)
// - HalfOpen: calls run as recovery probes; any failure reopens the circuit
//   immediately and restarts the cooldown clock; enough consecutive
//   successes close it and zero both counters
//
// Locking discipline: the mutex wraps only counter/state writes. Clock reads
// happen before the lock is taken and all logging happens after it is
// released, so lock hold time stays O(1) regardless of subscriber cost.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::BreakerError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Dependency assumed down, calls fail fast
    Open,
    /// Probing for recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a single circuit breaker
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before probing
    pub cooldown: Duration,

    /// Consecutive half-open successes required to close
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            half_open_max_probes: 2,
        }
    }
}

impl BreakerConfig {
    /// Create a configuration with the given threshold and cooldown
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            ..Self::default()
        }
    }

    /// Set the number of half-open successes required to close
    pub fn with_half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = probes;
        self
    }
}

/// Snapshot of a breaker's state for the admin/ops surface
///
/// Reading a snapshot never mutates the breaker; if the cooldown has
/// elapsed the snapshot reports `HalfOpen` without performing the
/// transition.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Seconds until an open circuit starts probing (0 when not open)
    pub cooldown_remaining_secs: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Mutable state behind the breaker's mutex
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    /// Monotonic stamp of the most recent failure (drives the cooldown)
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    /// Wall-clock mirrors of the stamps above, for stats only
    last_failure_wall: Option<DateTime<Utc>>,
    last_success_wall: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_success_at: None,
            last_failure_wall: None,
            last_success_wall: None,
        }
    }
}

/// Failure-isolation guard around calls to one named external dependency
///
/// Process-lifetime singleton per dependency, owned by the
/// [`CircuitBreakerRegistry`](crate::registry::CircuitBreakerRegistry).
/// All state is private; the only mutation paths are `call` outcomes and
/// `reset`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker for the named dependency
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// The dependency this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` through the breaker without a per-call timeout
    ///
    /// Fails fast with [`BreakerError::CircuitOpen`] while the circuit is
    /// open; otherwise the operation's own error is recorded as a failure
    /// and re-raised unchanged.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        self.call_inner(op, None).await
    }

    /// Run `op` through the breaker with a per-call timeout
    ///
    /// A timeout counts toward the failure threshold exactly like an
    /// upstream error, but is surfaced as [`BreakerError::Timeout`]. The
    /// breaker only stops waiting; cancelling the underlying operation is
    /// the runtime's concern (the future is dropped).
    pub async fn call_with_timeout<T, F, Fut>(
        &self,
        op: F,
        timeout: Duration,
    ) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        self.call_inner(op, Some(timeout)).await
    }

    async fn call_inner<T, F, Fut>(
        &self,
        op: F,
        timeout: Option<Duration>,
    ) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        match self.state() {
            CircuitState::Open => {
                let retry_after = self.cooldown_remaining();
                return Err(BreakerError::circuit_open(&self.name, retry_after));
            }
            CircuitState::Closed | CircuitState::HalfOpen => {}
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result.map_err(BreakerError::Upstream),
                Err(_) => Err(BreakerError::timeout(&self.name, limit)),
            },
            None => op().await.map_err(BreakerError::Upstream),
        };

        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Current state, performing the lazy Open -> HalfOpen transition
    /// when the cooldown has elapsed
    pub fn state(&self) -> CircuitState {
        let now = Instant::now();

        let (state, transitioned) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.state == CircuitState::Open && self.cooldown_elapsed(&inner, now) {
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                (CircuitState::HalfOpen, true)
            } else {
                (inner.state, false)
            }
        };

        if transitioned {
            tracing::info!(dependency = %self.name, "circuit breaker half-open, probing");
        }
        state
    }

    /// Seconds left before an open circuit starts probing (zero otherwise)
    pub fn cooldown_remaining(&self) -> Duration {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::cooldown_remaining_at(&self.config, &inner, now)
    }

    /// Non-mutating snapshot for the admin/ops surface
    pub fn stats(&self) -> CircuitStats {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Report the effective state without writing it back; the actual
        // transition happens on the next call's state read.
        let state = if inner.state == CircuitState::Open && self.cooldown_elapsed(&inner, now) {
            CircuitState::HalfOpen
        } else {
            inner.state
        };

        CircuitStats {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            cooldown_remaining_secs: Self::cooldown_remaining_at(&self.config, &inner, now)
                .as_secs_f64(),
            last_failure_at: inner.last_failure_wall,
            last_success_at: inner.last_success_wall,
        }
    }

    /// Force the breaker back to Closed with zeroed counters
    ///
    /// Operator escape hatch for clearing a stuck breaker.
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.last_failure_at = None;
            inner.last_failure_wall = None;
        }
        tracing::info!(dependency = %self.name, "circuit breaker manually reset");
    }

    fn record_success(&self) {
        let now = Instant::now();
        let wall = Utc::now();

        let closed = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.last_success_at = Some(now);
            inner.last_success_wall = Some(wall);
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    false
                }
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.half_open_max_probes {
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.success_count = 0;
                        true
                    } else {
                        false
                    }
                }
                // A success can land here if the call started before the
                // circuit opened; it does not close the circuit early.
                CircuitState::Open => false,
            }
        };

        if closed {
            tracing::info!(dependency = %self.name, "circuit breaker closed after successful probes");
        }
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let wall = Utc::now();

        let opened = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.last_failure_at = Some(now);
            inner.last_failure_wall = Some(wall);
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        true
                    } else {
                        false
                    }
                }
                CircuitState::HalfOpen => {
                    // No grace during probing: one failure reopens and the
                    // cooldown clock restarts from this failure.
                    inner.state = CircuitState::Open;
                    inner.success_count = 0;
                    true
                }
                CircuitState::Open => false,
            }
        };

        if opened {
            tracing::warn!(
                dependency = %self.name,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    fn cooldown_elapsed(&self, inner: &BreakerInner, now: Instant) -> bool {
        match inner.last_failure_at {
            Some(at) => now.duration_since(at) > self.config.cooldown,
            None => true,
        }
    }

    fn cooldown_remaining_at(
        config: &BreakerConfig,
        inner: &BreakerInner,
        now: Instant,
    ) -> Duration {
        if inner.state != CircuitState::Open {
            return Duration::ZERO;
        }
        match inner.last_failure_at {
            Some(at) => config.cooldown.saturating_sub(now.duration_since(at)),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test_api",
            BreakerConfig::new(threshold, Duration::from_secs(cooldown_secs)),
        )
    }

    async fn fail(cb: &CircuitBreaker) {
        let result: Result<(), _> = cb.call(|| async { Err(anyhow!("boom")) }).await;
        assert!(result.is_err());
    }

    async fn succeed(cb: &CircuitBreaker) {
        cb.call(|| async { Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn starts_closed() {
        let cb = breaker(5, 60);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn opens_after_exactly_threshold_failures() {
        let cb = breaker(3, 60);

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let cb = breaker(3, 60);

        fail(&cb).await;
        fail(&cb).await;
        succeed(&cb).await;

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);

        // The earlier failures no longer count toward the threshold.
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_rejects_without_invoking() {
        let cb = breaker(2, 60);
        fail(&cb).await;
        fail(&cb).await;

        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let result: Result<(), _> = cb
            .call(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(invocations.load(Ordering::SeqCst), 0);

        match err {
            BreakerError::CircuitOpen {
                dependency,
                retry_after,
            } => {
                assert_eq!(dependency, "test_api");
                assert!(retry_after <= Duration::from_secs(60));
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_cooldown() {
        let cb = breaker(2, 30);
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // A probe is allowed through now.
        succeed(&cb).await;
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_and_restarts_cooldown() {
        let cb = breaker(2, 30);
        fail(&cb).await;
        fail(&cb).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // The cooldown restarted from the probe failure.
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(16)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_probe_successes_close() {
        let config = BreakerConfig::new(2, Duration::from_secs(30)).with_half_open_max_probes(2);
        let cb = CircuitBreaker::new("test_api", config);

        fail(&cb).await;
        fail(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&cb).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await;
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_remaining_decreases_monotonically() {
        let cb = breaker(1, 60);
        fail(&cb).await;

        let first = cb.stats().cooldown_remaining_secs;
        assert!(first > 59.0 && first <= 60.0);

        tokio::time::advance(Duration::from_secs(20)).await;
        let second = cb.stats().cooldown_remaining_secs;
        assert!(second < first);
        assert_eq!(cb.stats().state, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(41)).await;
        assert_eq!(cb.stats().cooldown_remaining_secs, 0.0);
        // stats reports the effective state without mutating the breaker
        assert_eq!(cb.stats().state, CircuitState::HalfOpen);
        assert_eq!(cb.stats().state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure_with_distinct_kind() {
        let cb = breaker(1, 60);

        let result: Result<(), _> = cb
            .call_with_timeout(
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                Duration::from_millis(10),
            )
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn upstream_error_is_reraised() {
        let cb = breaker(5, 60);
        let result: Result<(), _> = cb.call(|| async { Err(anyhow!("qdrant unreachable")) }).await;

        match result.unwrap_err() {
            BreakerError::Upstream(err) => {
                assert!(err.to_string().contains("qdrant unreachable"));
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn manual_reset_closes() {
        let cb = breaker(1, 60);
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        succeed(&cb).await;
    }
}
