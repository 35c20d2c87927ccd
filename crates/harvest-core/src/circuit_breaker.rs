//! Per-provider circuit breakers.
//!
//! A provider that keeps failing to spawn or keeps crashing trips its breaker;
//! while it is open the client refuses to respawn the process, so an optional
//! provider falls straight through to its fallbacks. After the cool-down a
//! single trial call is let through: success closes the breaker, failure re-opens it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Breaker state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { until: Instant },
    /// One trial call has been admitted and has not reported back yet.
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::Closed { failures: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive process failures that open the breaker.
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cool_down: Duration::from_secs(30),
        }
    }
}

/// Breaker table keyed by provider name.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, CircuitState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        self.states().get(provider).copied().unwrap_or_default()
    }

    /// Whether `provider` may be (re)started now.
    ///
    /// Returns the remaining cool-down when the breaker is open.
    pub fn admit(&self, provider: &str) -> Result<(), Duration> {
        let mut states = self.states();
        let state = states.entry(provider.to_owned()).or_default();
        match *state {
            CircuitState::Closed { .. } | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    info!(provider, "circuit half-open, probing provider");
                    *state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(until - now)
                }
            }
        }
    }

    pub fn record_success(&self, provider: &str) {
        let mut states = self.states();
        let state = states.entry(provider.to_owned()).or_default();
        if matches!(*state, CircuitState::HalfOpen) {
            info!(provider, "circuit closed after a successful trial call");
        }
        *state = CircuitState::Closed { failures: 0 };
    }

    pub fn record_failure(&self, provider: &str) {
        let mut states = self.states();
        let state = states.entry(provider.to_owned()).or_default();
        let failures = match *state {
            CircuitState::Closed { failures } => failures.saturating_add(1),
            CircuitState::HalfOpen => self.config.failure_threshold,
            CircuitState::Open { .. } => return,
        };
        if failures >= self.config.failure_threshold.max(1) {
            warn!(
                provider,
                failures,
                cool_down_ms = self.config.cool_down.as_millis() as u64,
                "circuit opened"
            );
            *state = CircuitState::Open {
                until: Instant::now() + self.config.cool_down,
            };
        } else {
            *state = CircuitState::Closed { failures };
        }
    }
}
