//! Resilience settings
//!
//! Loaded in layers with the `config` crate:
//! 1. Embedded defaults (`config/default.toml`, compiled in)
//! 2. Optional `config/resilience.{toml,yaml,json}` in the working directory
//! 3. Environment variables, e.g. `VULNKB_RETRY__MAX_RETRIES=5`

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::classify::ErrorKind;
use crate::guard::ResponseGuard;
use crate::orchestrator::ConcurrentFetchOrchestrator;
use crate::retry::{BackoffStrategy, RetryConfig};
use crate::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embedded default configuration
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// All engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Retry tuning
    #[serde(default)]
    pub retry: RetrySettings,
    /// Circuit breaker tuning
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Batch fetch tuning
    #[serde(default)]
    pub fetch: FetchSettings,
}

/// `[retry]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// exponential | linear | fixed
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for one delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Shave a random fraction off each delay
    #[serde(default = "default_true")]
    pub jitter_enabled: bool,
    /// Largest fraction jitter may remove
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Error kinds that may be retried
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_enabled: true,
            jitter_factor: default_jitter_factor(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

/// `[circuit_breaker]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Half-open successes before the circuit closes
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time the circuit stays open before probing
    #[serde(default = "default_breaker_timeout_ms")]
    pub timeout_ms: u64,
    /// Probes allowed in flight while half-open
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_breaker_timeout_ms(),
            half_open_requests: default_half_open_requests(),
        }
    }
}

/// `[fetch]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Batch workers (0 = default)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Response body cap in bytes
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_response_size: default_max_response_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_factor() -> f64 {
    0.25
}
fn default_retryable_errors() -> Vec<ErrorKind> {
    vec![
        ErrorKind::RATE_LIMITED,
        ErrorKind::SERVICE_UNAVAILABLE,
        ErrorKind::TIMEOUT,
        ErrorKind::CONNECTION,
    ]
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_breaker_timeout_ms() -> u64 {
    60_000
}
fn default_half_open_requests() -> u32 {
    3
}
fn default_workers() -> usize {
    4
}
fn default_max_response_size() -> usize {
    crate::guard::DEFAULT_MAX_RESPONSE_SIZE
}

impl ResilienceSettings {
    /// Load from embedded defaults, optional file and environment
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::with_name("config/resilience").required(false))
            .add_source(
                Environment::with_prefix("VULNKB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("retry.retryable_errors"),
            )
            .build()?;

        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML document layered over the embedded defaults
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.retry_config().validate()?;
        self.circuit_breaker_config().validate()?;
        if self.fetch.max_response_size == 0 {
            return Err(crate::Error::invalid_config(
                "fetch.max_response_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Retry configuration for an executor
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        let retry = &self.retry;
        RetryConfig::new()
            .with_strategy(retry.strategy)
            .with_max_retries(retry.max_retries)
            .with_initial_delay(Duration::from_millis(retry.initial_delay_ms))
            .with_max_delay(Duration::from_millis(retry.max_delay_ms))
            .with_jitter(retry.jitter_enabled)
            .with_jitter_factor(retry.jitter_factor)
            .with_retryable_errors(retry.retryable_errors.iter().cloned())
    }

    /// Circuit breaker configuration
    #[must_use]
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        let cb = &self.circuit_breaker;
        CircuitBreakerConfig::new()
            .with_failure_threshold(cb.failure_threshold)
            .with_success_threshold(cb.success_threshold)
            .with_timeout(Duration::from_millis(cb.timeout_ms))
            .with_half_open_requests(cb.half_open_requests)
    }

    /// Response guard sized from `[fetch]`
    #[must_use]
    pub fn response_guard(&self) -> ResponseGuard {
        ResponseGuard::new(self.fetch.max_response_size)
    }

    /// Batch orchestrator sized from `[fetch]`
    #[must_use]
    pub fn orchestrator(&self) -> ConcurrentFetchOrchestrator {
        ConcurrentFetchOrchestrator::new(self.fetch.workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_parse() {
        let settings = ResilienceSettings::from_toml_str("").unwrap();
        assert_eq!(settings.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.circuit_breaker.timeout_ms, 60_000);
        assert_eq!(settings.fetch.workers, 4);
        assert!(settings
            .retry
            .retryable_errors
            .contains(&ErrorKind::RATE_LIMITED));
    }

    #[test]
    fn test_overrides_and_conversion() {
        let settings = ResilienceSettings::from_toml_str(
            r#"
            [retry]
            strategy = "linear"
            max_retries = 5
            initial_delay_ms = 250
            jitter_enabled = false
            retryable_errors = ["rate_limited", "quota_exhausted"]

            [circuit_breaker]
            failure_threshold = 3
            timeout_ms = 1500

            [fetch]
            max_response_size = 2048
            "#,
        )
        .unwrap();

        let retry = settings.retry_config();
        assert_eq!(retry.strategy, BackoffStrategy::Linear);
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.delay_for(1), Duration::from_millis(500));
        assert!(retry.is_retryable(&ErrorKind::new("quota_exhausted")));
        assert!(!retry.is_retryable(&ErrorKind::TIMEOUT));

        let breaker = settings.circuit_breaker_config();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.success_threshold, 2);
        assert_eq!(breaker.timeout, Duration::from_millis(1500));

        assert_eq!(settings.response_guard().max_response_size(), 2048);
        assert_eq!(settings.orchestrator().worker_count(), 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ResilienceSettings::from_toml_str("[retry]\njitter_factor = 2.0\n").unwrap_err();
        assert!(err.to_string().contains("jitter_factor"));

        let err =
            ResilienceSettings::from_toml_str("[circuit_breaker]\nfailure_threshold = 0\n")
                .unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn test_unknown_strategy_is_config_error() {
        let err = ResilienceSettings::from_toml_str("[retry]\nstrategy = \"fibonacci\"\n")
            .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("VULNKB_FETCH__WORKERS", "11");
        let settings = ResilienceSettings::load().unwrap();
        std::env::remove_var("VULNKB_FETCH__WORKERS");

        assert_eq!(settings.fetch.workers, 11);
    }
}
