//! Exponential backoff with bounded jitter

use syncgate_core::config::RetryConfig;

/// `delay = min(max_delay, base_delay * 2^retry_count)`, plus up to
/// `jitter_ratio * delay` of uniform jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound on the un-jittered delay
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    /// Build from retry configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Un-jittered delay for the given retry count
    pub fn delay_ms(&self, retry_count: u32) -> u64 {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Jitter for `delay_ms` given a uniform sample in `[0, 1)`
    pub fn jitter_ms(&self, delay_ms: u64, unit: f64) -> u64 {
        let unit = unit.clamp(0.0, 1.0);
        (delay_ms as f64 * self.jitter_ratio * unit) as u64
    }

    /// Earliest time the next attempt may run
    pub fn next_attempt_at(&self, last_attempt_at: u64, retry_count: u32, unit: f64) -> u64 {
        let delay = self.delay_ms(retry_count);
        last_attempt_at
            .saturating_add(delay)
            .saturating_add(self.jitter_ms(delay, unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(&RetryConfig::default())
    }

    #[test]
    fn test_doubling_until_cap() {
        let p = policy();
        assert_eq!(p.delay_ms(0), 60_000);
        assert_eq!(p.delay_ms(1), 120_000);
        assert_eq!(p.delay_ms(7), 7_680_000);
        assert_eq!(p.delay_ms(8), 14_400_000);
        assert_eq!(p.delay_ms(64), 14_400_000);
    }

    #[test]
    fn test_retry_counts_zero_to_ten() {
        let p = policy();
        for n in 0..=10u32 {
            let expected = (60_000u64 * 2u64.pow(n)).min(14_400_000);
            assert_eq!(p.delay_ms(n), expected);
            assert!(p.delay_ms(n) <= p.max_delay_ms);
        }
    }

    #[test]
    fn test_jitter_is_bounded_by_ratio() {
        let p = policy();
        assert_eq!(p.jitter_ms(100_000, 0.0), 0);
        assert_eq!(p.jitter_ms(100_000, 0.5), 10_000);
        assert!(p.jitter_ms(100_000, 0.999_999) < 20_000);
        assert_eq!(p.next_attempt_at(1_000, 0, 0.5), 1_000 + 60_000 + 6_000);
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(
            base in 1u64..1_000_000,
            extra in 0u64..100_000_000,
            retry_count in 0u32..200,
            unit in 0.0f64..1.0,
        ) {
            let p = BackoffPolicy { base_delay_ms: base, max_delay_ms: base + extra, jitter_ratio: 0.2 };
            let delay = p.delay_ms(retry_count);
            prop_assert!(delay <= p.max_delay_ms);
            prop_assert!(delay >= base.min(p.max_delay_ms));
            prop_assert!(delay >= p.delay_ms(retry_count.saturating_sub(1)));
            prop_assert!(p.jitter_ms(delay, unit) as f64 <= delay as f64 * 0.2);
        }
    }
}
