// Registry of per-dependency circuit breakers
//
// One CircuitBreaker per external dependency name, process lifetime.
// The registry replaces module-level singletons: it is constructed once at
// startup and passed by Arc to call sites, which keeps breaker state
// explicit and testable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState, CircuitStats};

/// The external dependencies Valet calls, with their breaker tuning
///
/// Thresholds and cooldowns are fixed per dependency: the search APIs fail
/// fast and recover quickly, the document store and chat completion APIs
/// get more slack before opening.
fn default_configs() -> Vec<(&'static str, BreakerConfig)> {
    vec![
        ("exa_api", BreakerConfig::new(3, Duration::from_secs(30))),
        ("tavily_api", BreakerConfig::new(3, Duration::from_secs(30))),
        ("firebase", BreakerConfig::new(5, Duration::from_secs(60))),
        ("qdrant", BreakerConfig::new(4, Duration::from_secs(45))),
        ("claude_api", BreakerConfig::new(5, Duration::from_secs(60))),
        ("telegram_api", BreakerConfig::new(5, Duration::from_secs(30))),
        ("gemini_api", BreakerConfig::new(4, Duration::from_secs(45))),
        ("evolution_api", BreakerConfig::new(3, Duration::from_secs(60))),
    ]
}

/// Process-wide collection of circuit breakers, one per dependency name
///
/// Safe for concurrent first use: unknown names are created lazily with the
/// registry's default configuration under a write lock.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: BreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config: BreakerConfig::default(),
        }
    }

    /// Create a registry pre-populated with Valet's known dependencies
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        {
            let mut breakers = registry
                .breakers
                .write()
                .unwrap_or_else(|e| e.into_inner());
            for (name, config) in default_configs() {
                breakers.insert(name.to_string(), Arc::new(CircuitBreaker::new(name, config)));
            }
        }
        registry
    }

    /// Get the breaker for a dependency, creating it on first use
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = breakers.get(name) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        // Re-check under the write lock: another task may have created it
        // between our read and write acquisitions.
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
            })
            .clone()
    }

    /// Registered dependency names
    pub fn names(&self) -> Vec<String> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        breakers.keys().cloned().collect()
    }

    /// Stats snapshots for every registered breaker
    pub fn stats(&self) -> HashMap<String, CircuitStats> {
        // Clone the handles under the read lock, compute snapshots outside it.
        let handles: Vec<Arc<CircuitBreaker>> = {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            breakers.values().cloned().collect()
        };

        handles
            .into_iter()
            .map(|b| (b.name().to_string(), b.stats()))
            .collect()
    }

    /// Current state of every registered breaker
    pub fn status(&self) -> HashMap<String, CircuitState> {
        self.stats()
            .into_iter()
            .map(|(name, stats)| (name, stats.state))
            .collect()
    }

    /// Reset one breaker to Closed; returns false if the name is unknown
    pub fn reset(&self, name: &str) -> bool {
        let breaker = {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            breakers.get(name).cloned()
        };
        match breaker {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every registered breaker to Closed
    pub fn reset_all(&self) {
        let handles: Vec<Arc<CircuitBreaker>> = {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            breakers.values().cloned().collect()
        };
        for breaker in handles {
            breaker.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
