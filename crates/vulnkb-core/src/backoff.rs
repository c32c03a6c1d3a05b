//! Backoff delay calculation
//!
//! Pure apart from the jitter draw. Jitter only ever shortens a delay: it
//! removes a random fraction of up to `jitter_factor` from the capped value,
//! so no delay exceeds `max_delay`.

use crate::retry::{BackoffStrategy, RetryConfig};
use rand::Rng;
use std::time::Duration;

/// Delay to wait after the failed `attempt` (0-based), using the thread RNG
#[must_use]
pub fn delay(attempt: u32, config: &RetryConfig) -> Duration {
    delay_with_rng(attempt, config, &mut rand::thread_rng())
}

/// Delay to wait after the failed `attempt`, drawing jitter from `rng`
#[must_use]
pub fn delay_with_rng<R: Rng>(attempt: u32, config: &RetryConfig, rng: &mut R) -> Duration {
    let capped = base_delay(attempt, config);
    if !config.jitter_enabled || capped.is_zero() {
        return capped;
    }

    // NaN or infinite factors disable jitter
    let factor = if config.jitter_factor.is_finite() {
        config.jitter_factor.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if factor == 0.0 {
        return capped;
    }

    let fraction = rng.gen_range(0.0..=factor);
    capped.mul_f64(1.0 - fraction).min(capped)
}

/// Capped delay without jitter
#[must_use]
pub fn base_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let raw = match config.strategy {
        BackoffStrategy::Exponential => 2u32
            .checked_pow(attempt)
            .and_then(|factor| config.initial_delay.checked_mul(factor)),
        BackoffStrategy::Linear => attempt
            .checked_add(1)
            .and_then(|factor| config.initial_delay.checked_mul(factor)),
        BackoffStrategy::Fixed => Some(config.initial_delay),
    };

    // Overflow saturates to the cap
    raw.map_or(config.max_delay, |d| d.min(config.max_delay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(strategy: BackoffStrategy) -> RetryConfig {
        RetryConfig::new()
            .with_strategy(strategy)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(false)
    }

    #[test]
    fn test_exponential_doubles() {
        let config = config(BackoffStrategy::Exponential);
        assert_eq!(delay(0, &config), Duration::from_millis(100));
        assert_eq!(delay(1, &config), Duration::from_millis(200));
        assert_eq!(delay(2, &config), Duration::from_millis(400));
        assert_eq!(delay(3, &config), Duration::from_millis(800));
    }

    #[test]
    fn test_linear_grows_by_initial_delay() {
        let config = config(BackoffStrategy::Linear);
        assert_eq!(delay(0, &config), Duration::from_millis(100));
        assert_eq!(delay(1, &config), Duration::from_millis(200));
        assert_eq!(delay(4, &config), Duration::from_millis(500));
    }

    #[test]
    fn test_fixed_is_constant() {
        let config = config(BackoffStrategy::Fixed);
        for attempt in [0, 1, 7, 30] {
            assert_eq!(delay(attempt, &config), Duration::from_millis(100));
        }
    }

    #[test]
    fn test_delay_respects_max() {
        let config = config(BackoffStrategy::Exponential);
        // 100ms * 2^6 = 6.4s, capped at 5s
        assert_eq!(delay(6, &config), Duration::from_secs(5));

        let linear = config.clone().with_strategy(BackoffStrategy::Linear);
        assert_eq!(delay(99, &linear), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_attempt_saturates_to_cap() {
        let config = config(BackoffStrategy::Exponential);
        assert_eq!(delay(64, &config), Duration::from_secs(5));
        assert_eq!(delay(u32::MAX, &config), Duration::from_secs(5));

        let linear = config.with_strategy(BackoffStrategy::Linear);
        assert_eq!(delay(u32::MAX, &linear), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_only_shortens() {
        let config = config(BackoffStrategy::Exponential)
            .with_jitter(true)
            .with_jitter_factor(0.5);
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..10 {
            let capped = base_delay(attempt, &config);
            for _ in 0..50 {
                let jittered = delay_with_rng(attempt, &config, &mut rng);
                assert!(jittered <= capped);
                assert!(jittered >= capped.mul_f64(0.5));
            }
        }
    }

    #[test]
    fn test_non_finite_jitter_factor_is_ignored() {
        let mut rng = StdRng::seed_from_u64(3);
        for factor in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let config = config(BackoffStrategy::Exponential)
                .with_jitter(true)
                .with_jitter_factor(factor);
            assert_eq!(
                delay_with_rng(1, &config, &mut rng),
                Duration::from_millis(200)
            );
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_zero_jitter_factor_is_exact() {
        let config = config(BackoffStrategy::Linear)
            .with_jitter(true)
            .with_jitter_factor(0.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            delay_with_rng(2, &config, &mut rng),
            Duration::from_millis(300)
        );
    }
}
