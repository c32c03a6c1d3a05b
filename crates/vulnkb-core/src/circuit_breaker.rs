//! Circuit Breaker pattern implementation
//!
//! Stops issuing calls to a failing dependency once a failure threshold is
//! crossed, then probes for recovery. The circuit breaker has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Failures reached the threshold, requests are rejected
//! - HalfOpen: Probing whether the dependency has recovered
//!
//! One breaker guards one remote resource. All reads and writes go through a
//! single lock; time is read from tokio's clock so paused-time tests can drive
//! the open timeout.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failures reached threshold - requests are rejected
    Open,
    /// Probing recovery - a limited number of requests pass through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of successes in half-open state to close the circuit
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub timeout: Duration,
    /// Probes allowed in flight while half-open
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            half_open_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set success threshold for half-open state
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the half-open probe budget
    #[must_use]
    pub fn with_half_open_requests(mut self, requests: u32) -> Self {
        self.half_open_requests = requests;
        self
    }

    /// Check the configuration for values that would wedge the breaker
    pub fn validate(&self) -> crate::Result<()> {
        if self.failure_threshold == 0 {
            return Err(crate::Error::invalid_config(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.success_threshold == 0 {
            return Err(crate::Error::invalid_config(
                "circuit_breaker.success_threshold",
                "must be at least 1",
            ));
        }
        if self.half_open_requests == 0 {
            return Err(crate::Error::invalid_config(
                "circuit_breaker.half_open_requests",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure_time: Option<Instant>,
    half_open_successes: u32,
    probes_in_flight: u32,
}

/// Circuit breaker for a single remote resource
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_time: None,
                half_open_successes: 0,
                probes_in_flight: 0,
            }),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.read().state
    }

    /// Get the cumulative failure count
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.read().failures
    }

    /// Successes recorded since the circuit last went half-open
    #[must_use]
    pub fn half_open_successes(&self) -> u32 {
        self.read().half_open_successes
    }

    /// Check if the circuit allows a request.
    ///
    /// An open circuit whose timeout has elapsed moves to half-open and admits
    /// the caller. While half-open, each admission takes a probe slot that is
    /// given back by [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`release_probe`](Self::release_probe).
    pub fn can_execute(&self) -> bool {
        let mut inner = self.write();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure_time
                .map_or(Duration::MAX, |at| Instant::now().saturating_duration_since(at));
            if elapsed < self.config.timeout {
                return false;
            }
            info!(name = %self.name, "Circuit breaker entering half-open state");
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            inner.probes_in_flight = 0;
        }

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_requests {
                    inner.probes_in_flight += 1;
                    true
                } else {
                    debug!(
                        name = %self.name,
                        probes = inner.probes_in_flight,
                        "Circuit breaker probe budget exhausted"
                    );
                    false
                }
            }
            CircuitState::Open => false,
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.write();

        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                debug!(
                    name = %self.name,
                    successes = inner.half_open_successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success in half-open state"
                );

                if inner.half_open_successes >= self.config.success_threshold {
                    info!(name = %self.name, "Circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.half_open_successes = 0;
                    inner.probes_in_flight = 0;
                }
            }
            CircuitState::Open => {
                // Late result from a call admitted before the circuit opened
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.write();
        inner.failures = inner.failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                debug!(
                    name = %self.name,
                    failures = inner.failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                if inner.failures >= self.config.failure_threshold {
                    info!(
                        name = %self.name,
                        failures = inner.failures,
                        "Circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.last_failure_time = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    name = %self.name,
                    failures = inner.failures,
                    "Circuit breaker failure in half-open state, reopening"
                );
                inner.state = CircuitState::Open;
                inner.last_failure_time = Some(Instant::now());
                inner.half_open_successes = 0;
                inner.probes_in_flight = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a half-open probe slot without recording an outcome.
    ///
    /// Used when an admitted call is abandoned, e.g. on cancellation.
    pub fn release_probe(&self) {
        let mut inner = self.write();
        if inner.state == CircuitState::HalfOpen {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.write();
        if inner.state != CircuitState::Closed {
            info!(name = %self.name, "Circuit breaker reset");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.last_failure_time = None;
        inner.half_open_successes = 0;
        inner.probes_in_flight = 0;
    }

    fn read(&self) -> RwLockReadGuard<'_, BreakerInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BreakerInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests;
