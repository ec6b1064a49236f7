// Resilience primitives for outbound dependency calls
//
// Every call Valet makes to an external service (chat completion, vector
// search, document store, messaging send) goes through a per-dependency
// circuit breaker so that one failing service cannot consume handler
// resources or cascade into the others.
//
// Key design decisions:
// - One CircuitBreaker per dependency name, owned by an explicit
//   CircuitBreakerRegistry constructed at process start (no global state)
// - Breakers are agnostic to the wrapped operation: call sites pass opaque
//   async closures, upstream errors are carried as anyhow::Error and always
//   re-raised to the caller after being recorded
// - RetryPolicy is a separate decorator; whether it wraps the breaker or the
//   breaker wraps it is a per-call-site decision
// - All clock reads and logging happen outside locked sections; critical
//   sections are a few field writes
// - tokio::time::Instant throughout so tests can run under a paused clock

pub mod breaker;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod retry;

// Re-exports for convenience
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState, CircuitStats};
pub use error::{BreakerError, Result};
pub use rate_limit::{RateDecision, RateLimiter};
pub use registry::CircuitBreakerRegistry;
pub use retry::RetryPolicy;
