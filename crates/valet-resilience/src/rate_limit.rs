// Per-user sliding-window rate limiting
//
// Advisory UX protection, not a security boundary: state is process-local
// and resets on restart. The per-user ceiling comes from the caller (tier
// lookup happens elsewhere); this module only counts requests in the
// trailing window.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// When rejected, how long until the oldest request ages out of the
    /// window (zero when allowed)
    pub retry_after: Duration,
}

impl RateDecision {
    /// Retry delay rounded up to whole seconds, for user-facing messages
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after.as_secs_f64().ceil() as u64
    }
}

/// Sliding-window request counter, one window per user id
///
/// Each window holds the timestamps of requests in the trailing 60 s,
/// pruned on every check. Windows are bounded by time, not count; empty
/// windows stick around until the user's next request refills them.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter with the standard 60 s window
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    /// Create a limiter with a custom window length
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `user_id` may make a request under `limit`
    ///
    /// Admitting records the request's timestamp; rejecting leaves the
    /// window untouched and reports how long until a slot frees up.
    pub fn check(&self, user_id: &str, limit: usize) -> RateDecision {
        let now = Instant::now();

        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let window = requests.entry(user_id.to_string()).or_default();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < limit {
            window.push_back(now);
            RateDecision {
                allowed: true,
                retry_after: Duration::ZERO,
            }
        } else {
            let retry_after = match window.front() {
                Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                None => Duration::ZERO,
            };
            RateDecision {
                allowed: false,
                retry_after,
            }
        }
    }

    /// Number of requests currently counted against `user_id`
    pub fn current_usage(&self, user_id: &str) -> usize {
        let now = Instant::now();
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        match requests.get(user_id) {
            Some(window) => window
                .iter()
                .filter(|&&at| now.duration_since(at) < self.window)
                .count(),
            None => 0,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
