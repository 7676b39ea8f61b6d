//! Exponential backoff with jitter for `WsClient` reconnects (§4.4).

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Unbounded-retry exponential backoff (the venue connection is expected to
/// come back eventually; there is no `max_retries` here, unlike a one-shot
/// operation's backoff).
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.min_backoff;
        Self { config, current }
    }

    /// Jittered delay in `[min_backoff, current]`, then advances `current`
    /// toward `max_backoff`.
    pub fn next_delay(&mut self) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        let span = self.current.saturating_sub(self.config.min_backoff);
        let delay = self.config.min_backoff + span.mul_f64(jitter);

        self.current = Duration::from_secs_f64(self.current.as_secs_f64() * self.config.multiplier)
            .min(self.config.max_backoff);

        delay
    }

    pub fn reset(&mut self) {
        self.current = self.config.min_backoff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_bounds() {
        let mut b = ExponentialBackoff::new(BackoffConfig {
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
        });
        for _ in 0..20 {
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(10));
            assert!(d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn reset_returns_to_min() {
        let mut b = ExponentialBackoff::new(BackoffConfig {
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        });
        b.next_delay();
        b.next_delay();
        b.reset();
        let d = b.next_delay();
        assert!(d <= Duration::from_millis(10));
    }
}
