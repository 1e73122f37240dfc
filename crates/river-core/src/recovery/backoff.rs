//! Backoff strategies for retried store operations

use std::time::Duration;

/// Configuration for backoff behavior
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Add random jitter so concurrent runners do not retry in lockstep
    pub jitter: bool,
    /// Maximum jitter ratio (0.0 - 1.0)
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffConfig {
    pub fn with_initial_delay(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            ..Default::default()
        }
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Backoff strategy trait
pub trait BackoffStrategy: Send + Sync {
    /// Delay for the given attempt number (0-indexed)
    fn delay_for_attempt(&self, attempt: u32) -> Duration;

    fn reset(&mut self);
}

/// Exponential backoff, capped at `max_delay`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Get the next delay and advance the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt += 1;
        delay
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if !self.config.jitter {
            return delay;
        }

        let jitter_range = delay.as_secs_f64() * self.config.jitter_ratio;
        let jittered = delay.as_secs_f64() + rand_jitter(jitter_range);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(attempt as i32);

        let capped_delay =
            Duration::from_secs_f64(base_delay.min(self.config.max_delay.as_secs_f64()));

        self.add_jitter(capped_delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Cheap pseudo-random jitter from the clock's sub-second nanos
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let hash = nanos.wrapping_mul(2654435761);
    let normalized = (hash as f64) / (u32::MAX as f64);

    normalized * range
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial: Duration, max: Duration) -> BackoffConfig {
        BackoffConfig::with_initial_delay(initial)
            .max_delay(max)
            .multiplier(2.0)
            .jitter(false)
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let backoff = ExponentialBackoff::with_config(no_jitter(
            Duration::from_millis(100),
            Duration::from_secs(10),
        ));

        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_backoff_cap() {
        let backoff =
            ExponentialBackoff::with_config(no_jitter(Duration::from_secs(1), Duration::from_secs(5)));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let backoff = ExponentialBackoff::with_config(
            BackoffConfig::with_initial_delay(Duration::from_millis(100)).max_delay(Duration::from_secs(1)),
        );
        let delay = backoff.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(121));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = ExponentialBackoff::new();
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        assert_eq!(backoff.attempt, 2);

        backoff.reset();
        assert_eq!(backoff.attempt, 0);
    }
}
