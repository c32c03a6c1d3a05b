use super::*;

fn breaker(failure_threshold: u32, success_threshold: u32) -> CircuitBreaker {
    let config = CircuitBreakerConfig::new()
        .with_failure_threshold(failure_threshold)
        .with_success_threshold(success_threshold)
        .with_timeout(Duration::from_secs(10))
        .with_half_open_requests(2);
    CircuitBreaker::new("nvd", config)
}

fn trip(cb: &CircuitBreaker) {
    for _ in 0..cb.config().failure_threshold {
        cb.record_failure();
    }
    assert_eq!(cb.state(), CircuitState::Open);
}

#[test]
fn test_circuit_breaker_config_defaults() {
    let config = CircuitBreakerConfig::default();
    assert_eq!(config.failure_threshold, 5);
    assert_eq!(config.success_threshold, 2);
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert_eq!(config.half_open_requests, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_circuit_breaker_config_builder() {
    let config = CircuitBreakerConfig::new()
        .with_failure_threshold(10)
        .with_success_threshold(3)
        .with_timeout(Duration::from_secs(60))
        .with_half_open_requests(1);

    assert_eq!(config.failure_threshold, 10);
    assert_eq!(config.success_threshold, 3);
    assert_eq!(config.timeout, Duration::from_secs(60));
    assert_eq!(config.half_open_requests, 1);
}

#[test]
fn test_config_rejects_zero_thresholds() {
    assert!(CircuitBreakerConfig::new()
        .with_failure_threshold(0)
        .validate()
        .is_err());
    assert!(CircuitBreakerConfig::new()
        .with_half_open_requests(0)
        .validate()
        .is_err());
}

#[test]
fn test_circuit_breaker_initial_state() {
    let cb = CircuitBreaker::with_defaults("test");
    assert_eq!(cb.name(), "test");
    assert_eq!(cb.state(), CircuitState::Closed);
    assert!(cb.can_execute());
    assert_eq!(cb.failure_count(), 0);
}

#[test]
fn test_circuit_breaker_opens_after_failures() {
    let cb = breaker(3, 2);

    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Closed);

    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Closed);

    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);
    assert!(!cb.can_execute());
}

#[test]
fn test_circuit_breaker_success_resets_failures() {
    let cb = breaker(3, 2);

    cb.record_failure();
    cb.record_failure();
    assert_eq!(cb.failure_count(), 2);

    cb.record_success();
    assert_eq!(cb.failure_count(), 0);
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_rejects_until_timeout() {
    let cb = breaker(3, 2);
    trip(&cb);

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(!cb.can_execute());
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cb.can_execute());
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_closes_after_success_threshold() {
    let cb = breaker(3, 2);
    trip(&cb);
    tokio::time::advance(Duration::from_secs(10)).await;

    assert!(cb.can_execute());
    cb.record_success();
    assert_eq!(cb.state(), CircuitState::HalfOpen);
    assert_eq!(cb.half_open_successes(), 1);

    assert!(cb.can_execute());
    cb.record_success();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.failure_count(), 0);
    assert!(cb.can_execute());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let cb = breaker(3, 2);
    trip(&cb);
    tokio::time::advance(Duration::from_secs(10)).await;

    assert!(cb.can_execute());
    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.failure_count(), 4);
    assert!(!cb.can_execute());

    // Reopening restarts the timeout
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(!cb.can_execute());
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(cb.can_execute());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_limits_probes_in_flight() {
    let cb = breaker(3, 5);
    trip(&cb);
    tokio::time::advance(Duration::from_secs(10)).await;

    assert!(cb.can_execute());
    assert!(cb.can_execute());
    assert!(!cb.can_execute());

    cb.release_probe();
    assert!(cb.can_execute());

    cb.record_success();
    assert!(cb.can_execute());
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[test]
fn test_circuit_breaker_reset() {
    let cb = breaker(2, 2);

    cb.record_failure();
    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);

    cb.reset();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.failure_count(), 0);
    assert!(cb.can_execute());
}

#[test]
fn test_circuit_state_display() {
    assert_eq!(format!("{}", CircuitState::Closed), "Closed");
    assert_eq!(format!("{}", CircuitState::Open), "Open");
    assert_eq!(format!("{}", CircuitState::HalfOpen), "HalfOpen");
}
