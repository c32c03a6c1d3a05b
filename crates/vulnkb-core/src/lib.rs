//! vulnkb Core - Client-side resilience engine
//!
//! This crate provides the machinery the feed client uses to talk to remote
//! vulnerability sources without hammering them, including:
//! - Backoff: exponential, linear and fixed delays with jitter
//! - Circuit breaker: closed / open / half-open admission control
//! - Retry: an executor combining classification, backoff and the breaker
//! - Metrics: counters for attempts, retries and outcomes
//! - Orchestrator: ordered, bounded, cancellable batch fetching
//! - Guard: response size limits
//! - Settings: layered configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod orchestrator;
pub mod priority;
pub mod retry;
pub mod settings;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classify::{Classify, ErrorKind, HttpStatusClassifier, SignalClassifier};
pub use error::{Error, Result};
pub use guard::{BodyLimiter, GuardError, ResponseGuard, DEFAULT_MAX_RESPONSE_SIZE};
pub use metrics::{MetricsSnapshot, RetryMetrics};
pub use orchestrator::{
    BatchError, BatchOutcome, BatchResults, ConcurrentFetchOrchestrator, DEFAULT_WORKERS,
};
pub use priority::RequestPriority;
pub use retry::{AdaptiveRetryExecutor, BackoffStrategy, ExecuteError, RetryConfig};
pub use settings::ResilienceSettings;

/// Re-exported so callers can build cancellation tokens without a direct dependency
pub use tokio_util::sync::CancellationToken;
