use rand::Rng;
use std::time::Duration;

use crate::config::Config;

/// Delay schedule between fetch retries: doubling from `base_ms`, capped at
/// `max_ms`, with up to `jitter_percent` of random extra wait.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base_ms: u64,
    max_ms: u64,
    jitter_percent: u64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Config::RETRY_BACKOFF_MS, Config::RETRY_BACKOFF_MAX_MS)
    }
}

impl ExponentialBackoff {
    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_percent: 10,
        }
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent.min(100);
        self
    }

    /// Wait before retry number `attempt` (0 = first retry)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential_delay = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(20)));
        let capped_delay = exponential_delay.min(self.max_ms);
        let jitter_ceiling = capped_delay.saturating_mul(self.jitter_percent) / 100;
        let jitter = if jitter_ceiling > 0 {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        } else {
            0
        };
        Duration::from_millis(capped_delay + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let backoff = ExponentialBackoff::new(100, 10000).with_jitter(0);
        assert_eq!(backoff.delay(0).as_millis(), 100);
        assert_eq!(backoff.delay(1).as_millis(), 200);
        assert_eq!(backoff.delay(2).as_millis(), 400);
    }

    #[test]
    fn test_max_cap() {
        let backoff = ExponentialBackoff::new(100, 1000).with_jitter(0);
        assert_eq!(backoff.delay(10).as_millis(), 1000);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let backoff = ExponentialBackoff::new(1000, 1000).with_jitter(10);
        for _ in 0..50 {
            let ms = backoff.delay(0).as_millis();
            assert!((1000..=1100).contains(&ms), "delay {} out of range", ms);
        }
    }
}
