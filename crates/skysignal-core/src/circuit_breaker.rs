//! Per-upstream circuit breaker.
//!
//! One breaker lives inside each adapter's [`HttpFetcher`](crate::HttpFetcher)
//! and counts failed fetches (after retries), not individual HTTP attempts.
//! Cooldowns are measured on a [`Clock`] so they can be replayed in tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::UtcDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed fetches that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects fetches before one probe is allowed.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BreakerState {
    circuit: CircuitState,
    consecutive_failures: u32,
    reopens_at: Option<UtcDateTime>,
}

impl BreakerState {
    const CLOSED: Self = Self {
        circuit: CircuitState::Closed,
        consecutive_failures: 0,
        reopens_at: None,
    };
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(BreakerState::CLOSED),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a fetch may go upstream now. An open circuit whose cooldown
    /// has passed turns half-open and lets the caller probe.
    pub fn allow_request(&self) -> bool {
        let mut state = self.lock();
        match state.circuit {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = self.clock.now();
                let cooled_down = state.reopens_at.map_or(true, |at| now >= at);
                if cooled_down {
                    state.circuit = CircuitState::HalfOpen;
                    state.reopens_at = None;
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        *self.lock() = BreakerState::CLOSED;
    }

    /// A failed probe reopens immediately; otherwise the threshold applies.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let trips = state.circuit == CircuitState::HalfOpen
            || state.consecutive_failures >= self.config.failure_threshold;
        if trips {
            state.circuit = CircuitState::Open;
            state.reopens_at = Some(self.clock.now().saturating_add(self.config.open_timeout));
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().circuit
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Remaining cooldown of an open circuit.
    pub fn retry_after(&self) -> Option<Duration> {
        let state = self.lock();
        let reopens_at = state.reopens_at.filter(|_| state.circuit == CircuitState::Open)?;
        Some(self.clock.now().age_at(reopens_at))
    }
}
