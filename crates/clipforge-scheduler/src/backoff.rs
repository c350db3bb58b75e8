//! Retry backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::SchedulerConfig;

/// Delay before re-enqueueing after a retryable failure.
///
/// `failed_attempt` is the 1-based attempt that just failed; the delay grows
/// by `retry_factor` per attempt and is spread by `retry_jitter` so a burst
/// of failures does not re-arrive as a burst.
pub fn retry_delay(config: &SchedulerConfig, failed_attempt: u32) -> Duration {
    let exponent = failed_attempt.saturating_sub(1).min(10);
    let base = config.retry_base.as_secs_f64() * config.retry_factor.powi(exponent as i32);

    let jitter = config.retry_jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        1.0
    };

    Duration::from_secs_f64((base * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: f64) -> SchedulerConfig {
        SchedulerConfig {
            retry_base: Duration::from_secs(30),
            retry_factor: 2.0,
            retry_jitter: jitter,
            ..Default::default()
        }
    }

    #[test]
    fn delay_doubles_without_jitter() {
        let config = config(0.0);
        assert_eq!(retry_delay(&config, 1), Duration::from_secs(30));
        assert_eq!(retry_delay(&config, 2), Duration::from_secs(60));
        assert_eq!(retry_delay(&config, 3), Duration::from_secs(120));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = config(0.25);
        for _ in 0..100 {
            let delay = retry_delay(&config, 1).as_secs_f64();
            assert!((22.5..=37.5).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn exponent_is_capped() {
        let config = config(0.0);
        // Does not overflow for absurd attempt counts.
        let delay = retry_delay(&config, 100);
        assert_eq!(delay, Duration::from_secs(30 * 1024));
    }
}
