//! Adaptive retry execution
//!
//! [`AdaptiveRetryExecutor`] runs one unit of remote work: it asks the circuit
//! breaker for admission, attempts the operation, retries errors whose kind is
//! in the configured retryable set with backoff between attempts, and records
//! every terminal outcome in [`RetryMetrics`] exactly once.

use crate::backoff;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::classify::{Classify, ErrorKind};
use crate::metrics::RetryMetrics;
use crate::priority::RequestPriority;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `initial_delay * 2^attempt`
    #[default]
    Exponential,
    /// `initial_delay * (attempt + 1)`
    Linear,
    /// `initial_delay`
    Fixed,
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Backoff growth strategy
    pub strategy: BackoffStrategy,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Shave a random fraction off each delay
    pub jitter_enabled: bool,
    /// Largest fraction jitter may remove (0.0 - 1.0)
    pub jitter_factor: f64,
    /// Error kinds that may be retried
    pub retryable_errors: HashSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_enabled: true,
            jitter_factor: 0.25,
            retryable_errors: [
                ErrorKind::RATE_LIMITED,
                ErrorKind::SERVICE_UNAVAILABLE,
                ErrorKind::TIMEOUT,
                ErrorKind::CONNECTION,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backoff strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set maximum retries
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    /// Set jitter factor
    #[must_use]
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Add one retryable kind
    #[must_use]
    pub fn with_retryable(mut self, kind: ErrorKind) -> Self {
        self.retryable_errors.insert(kind);
        self
    }

    /// Replace the retryable set
    #[must_use]
    pub fn with_retryable_errors(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_errors = kinds.into_iter().collect();
        self
    }

    /// Whether `kind` is in the retryable set
    #[must_use]
    pub fn is_retryable(&self, kind: &ErrorKind) -> bool {
        self.retryable_errors.contains(kind)
    }

    /// Delay before retrying after `attempt` (0-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff::delay(attempt, self)
    }

    /// Check the configuration for out-of-range values
    pub fn validate(&self) -> crate::Result<()> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(crate::Error::invalid_config(
                "retry.jitter_factor",
                format!("{} is outside 0.0..=1.0", self.jitter_factor),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(crate::Error::invalid_config(
                "retry.initial_delay",
                "must not exceed retry.max_delay",
            ));
        }
        Ok(())
    }
}

/// Terminal failure of [`AdaptiveRetryExecutor::execute`]
#[derive(Debug)]
pub enum ExecuteError<E> {
    /// The circuit breaker refused the call; the operation never ran
    CircuitOpen {
        /// Name of the refusing breaker
        breaker: String,
    },
    /// Every attempt failed with a retryable error
    MaxRetriesExceeded {
        /// Attempts made, including the first
        attempts: u32,
        /// Error from the last attempt
        source: E,
    },
    /// The caller cancelled before the call finished
    Cancelled,
    /// The operation failed with an error that is not retryable
    Operation(E),
}

impl<E> ExecuteError<E> {
    /// Whether the breaker refused the call
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether the retry budget ran out
    #[must_use]
    pub fn is_max_retries_exceeded(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }

    /// Whether the call was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The underlying operation error, if the operation ran and failed
    #[must_use]
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::MaxRetriesExceeded { source, .. } | Self::Operation(source) => Some(source),
            Self::CircuitOpen { .. } | Self::Cancelled => None,
        }
    }

    /// Consume into the underlying operation error
    #[must_use]
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::MaxRetriesExceeded { source, .. } | Self::Operation(source) => Some(source),
            Self::CircuitOpen { .. } | Self::Cancelled => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ExecuteError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { breaker } => write!(f, "circuit breaker '{}' is open", breaker),
            Self::MaxRetriesExceeded { attempts, source } => write!(
                f,
                "max retries exceeded after {} attempts: {}",
                attempts, source
            ),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Operation(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ExecuteError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MaxRetriesExceeded { source, .. } => Some(source),
            Self::Operation(e) => e.source(),
            Self::CircuitOpen { .. } | Self::Cancelled => None,
        }
    }
}

impl<E: Classify> Classify for ExecuteError<E> {
    fn kind(&self) -> Option<ErrorKind> {
        self.operation_error().and_then(|e| e.kind())
    }
}

/// Retry executor guarding one remote resource
#[derive(Debug)]
pub struct AdaptiveRetryExecutor {
    config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
    metrics: RetryMetrics,
}

impl AdaptiveRetryExecutor {
    /// Create an executor around an existing breaker
    #[must_use]
    pub fn new(config: RetryConfig, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            config,
            circuit_breaker,
            metrics: RetryMetrics::new(),
        }
    }

    /// Create an executor with its own breaker
    #[must_use]
    pub fn with_breaker_config(
        name: impl Into<String>,
        config: RetryConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self::new(config, Arc::new(CircuitBreaker::new(name, breaker_config)))
    }

    /// Retry configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The breaker guarding this executor's resource
    #[must_use]
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Counters for this executor
    #[must_use]
    pub fn metrics(&self) -> &RetryMetrics {
        &self.metrics
    }

    /// Run `operation` with retries.
    ///
    /// # Example
    /// ```ignore
    /// let executor = AdaptiveRetryExecutor::with_breaker_config(
    ///     "nvd",
    ///     RetryConfig::default(),
    ///     CircuitBreakerConfig::default(),
    /// );
    /// let body = executor
    ///     .execute(RequestPriority::High, || async { fetch_cve("CVE-2024-3094").await })
    ///     .await?;
    /// ```
    pub async fn execute<T, E, F, Fut>(
        &self,
        priority: RequestPriority,
        operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Debug,
    {
        self.run(priority, None, operation).await
    }

    /// Run `operation` with retries, giving up promptly once `cancel` fires.
    ///
    /// Cancellation is checked before the first attempt and raced against every
    /// attempt and every backoff sleep.
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        priority: RequestPriority,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Debug,
    {
        self.run(priority, Some(cancel), operation).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        priority: RequestPriority,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Debug,
    {
        self.metrics.record_attempt(priority);

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            self.metrics.record_cancelled();
            return Err(ExecuteError::Cancelled);
        }

        if !self.circuit_breaker.can_execute() {
            self.metrics.record_rejected();
            debug!(
                breaker = %self.circuit_breaker.name(),
                priority = %priority,
                "Circuit breaker open, rejecting call"
            );
            return Err(ExecuteError::CircuitOpen {
                breaker: self.circuit_breaker.name().to_string(),
            });
        }

        let max_retries = self.config.max_retries;
        let mut attempt: u32 = 0;
        let mut admission = Admission::new(self);

        loop {
            admission.attempts = attempt + 1;
            let result = tokio::select! {
                biased;
                _ = wait_cancelled(cancel) => return Err(admission.abandon()),
                result = operation() => result,
            };

            let error = match result {
                Ok(value) => {
                    admission.settle();
                    self.circuit_breaker.record_success();
                    self.metrics.record_success();
                    if attempt > 0 {
                        debug!(
                            attempt = attempt + 1,
                            priority = %priority,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let retryable = error
                .kind()
                .is_some_and(|kind| self.config.is_retryable(&kind));

            if !retryable {
                admission.settle();
                self.circuit_breaker.record_failure();
                self.metrics.record_failure();
                debug!(
                    attempt = attempt + 1,
                    error = ?error,
                    "Operation failed with non-retryable error"
                );
                return Err(ExecuteError::Operation(error));
            }

            if attempt >= max_retries {
                admission.settle();
                self.circuit_breaker.record_failure();
                self.metrics.record_failure();
                warn!(
                    attempts = attempt + 1,
                    breaker = %self.circuit_breaker.name(),
                    error = ?error,
                    "Operation failed, retries exhausted"
                );
                return Err(ExecuteError::MaxRetriesExceeded {
                    attempts: attempt + 1,
                    source: error,
                });
            }

            let delay = backoff::delay(attempt, &self.config);
            self.metrics.record_retry(delay);
            debug!(
                attempt = attempt + 1,
                max_retries = max_retries,
                delay_ms = delay.as_millis() as u64,
                priority = %priority,
                error = ?error,
                "Operation failed, retrying"
            );

            tokio::select! {
                biased;
                _ = wait_cancelled(cancel) => return Err(admission.abandon()),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

/// A call the breaker admitted but that has no recorded outcome yet.
///
/// If the call is abandoned, either through the cancel token or because its
/// future is dropped or unwinds, the breaker probe is given back and the call
/// is counted as cancelled.
struct Admission<'a> {
    executor: &'a AdaptiveRetryExecutor,
    attempts: u32,
    settled: bool,
}

impl<'a> Admission<'a> {
    fn new(executor: &'a AdaptiveRetryExecutor) -> Self {
        Self {
            executor,
            attempts: 0,
            settled: false,
        }
    }

    /// The caller records the outcome itself
    fn settle(&mut self) {
        self.settled = true;
    }

    fn abandon<E>(&mut self) -> ExecuteError<E> {
        self.release();
        ExecuteError::Cancelled
    }

    fn release(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;

        let executor = self.executor;
        executor.circuit_breaker.release_probe();
        executor.metrics.record_cancelled();
        debug!(
            attempts = self.attempts,
            breaker = %executor.circuit_breaker.name(),
            "Operation cancelled"
        );
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

async fn wait_cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
