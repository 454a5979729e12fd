//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Backoff state owned by the connection supervisor.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempts: u32,
    delay_ms: u64,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay_ms = config.initial_delay_ms;
        Self {
            config,
            attempts: 0,
            delay_ms,
        }
    }

    /// Back to the initial delay, e.g. after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay_ms = self.config.initial_delay_ms;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }

    /// Advance to the next attempt, updating the delay for the subsequent attempt.
    ///
    /// Returns the (jittered) delay to wait *before* performing this attempt, or
    /// `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let current = self.delay_ms.min(self.config.max_delay_ms);
        self.attempts = self.attempts.saturating_add(1);
        self.delay_ms = ((current as f64) * self.config.multiplier)
            .min(self.config.max_delay_ms as f64) as u64;

        let jittered = apply_jitter(current, self.config.jitter_factor);
        Some(Duration::from_millis(jittered.min(self.config.max_delay_ms)))
    }
}

/// Randomise `delay_ms` by up to ±`jitter_factor` of itself.
fn apply_jitter(delay_ms: u64, jitter_factor: f64) -> u64 {
    let jitter_range = (delay_ms as f64 * jitter_factor.clamp(0.0, 1.0)) as i64;
    if jitter_range > 0 {
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        (delay_ms as i64 + jitter).max(0) as u64
    } else {
        delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter_factor: f64, max_attempts: Option<u32>) -> ReconnectConfig {
        ReconnectConfig {
            jitter_factor,
            max_attempts,
            ..ReconnectConfig::default()
        }
    }

    fn millis(backoff: &mut Backoff) -> u64 {
        backoff.next_delay().unwrap().as_millis() as u64
    }

    #[test]
    fn grows_exponentially_up_to_cap() {
        let mut backoff = Backoff::new(config(0.0, None));
        let delays: Vec<u64> = (0..6).map(|_| millis(&mut backoff)).collect();
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 10_000, 10_000, 10_000]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn unlimited_attempts_never_exhaust() {
        let mut backoff = Backoff::new(config(0.0, None));
        for _ in 0..1_000 {
            assert!(backoff.next_delay().is_some());
        }
        assert!(!backoff.is_exhausted());
    }

    #[test]
    fn limited_attempts_exhaust() {
        let mut backoff = Backoff::new(config(0.0, Some(2)));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(config(0.5, None));
        for _ in 0..200 {
            backoff.reset();
            let first = millis(&mut backoff);
            assert!((1_000..=3_000).contains(&first), "first delay {first}");
            let second = millis(&mut backoff);
            assert!((2_000..=6_000).contains(&second), "second delay {second}");
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let mut backoff = Backoff::new(config(0.5, None));
        for _ in 0..50 {
            assert!(millis(&mut backoff) <= 10_000);
        }
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut backoff = Backoff::new(config(0.0, None));
        millis(&mut backoff);
        millis(&mut backoff);
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(millis(&mut backoff), 2_000);
    }
}
