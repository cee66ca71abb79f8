//! Reconnect delays.

use beacon_config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Shortest delay ever returned, whatever the configuration says.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Exponential backoff between reconnect attempts, capped at a maximum and
/// spread by random jitter so restarted stores are not hit all at once.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    next: Duration,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let max = config.max_delay.max(MIN_DELAY);
        let initial = config.initial_delay.clamp(MIN_DELAY, max);
        Self {
            initial,
            max,
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
            next: initial,
        }
    }

    /// Delay before the next attempt; grows the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        let grown = (delay.as_secs_f64() * self.multiplier).min(self.max.as_secs_f64());
        self.next = Duration::try_from_secs_f64(grown).unwrap_or(self.max);
        self.spread(delay)
    }

    /// Start over from the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }

    fn spread(&self, delay: Duration) -> Duration {
        if self.jitter == 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        delay.mul_f64(factor).max(MIN_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady() -> ReconnectConfig {
        ReconnectConfig {
            jitter: 0.0,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn test_defaults_double_up_to_cap() {
        let mut backoff = Backoff::new(&steady());
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 12, 24, 48, 60, 60]);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(&steady());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_zero_delay_never_spins() {
        let mut backoff = Backoff::new(&ReconnectConfig {
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_millis(50),
            ..steady()
        });
        let delays: Vec<Duration> = (0..3).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(4)
            ]
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(&ReconnectConfig::default());
        for _ in 0..50 {
            let delay = backoff.next_delay();
            backoff.reset();
            assert!(delay >= Duration::from_millis(2250), "{delay:?}");
            assert!(delay <= Duration::from_millis(3750), "{delay:?}");
        }
    }
}
