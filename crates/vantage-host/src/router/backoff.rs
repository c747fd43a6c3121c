//! Reconnect backoff for the router control connection

use std::time::Duration;

use rand::Rng;

use vantage_core::config::BackoffConfig;

/// Exponential backoff with additive jitter.
///
/// Each drawn delay is the current base plus up to `jitter` of it. The
/// base is multiplied after every draw and saturates at the configured
/// maximum, so the schedule stays bounded over arbitrarily long
/// outages.
#[derive(Debug)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    current: Duration,
}

impl ReconnectBackoff {
    /// Build from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        let initial = config.initial.min(config.max);
        Self {
            initial,
            max: config.max,
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
            current: initial,
        }
    }

    /// Delay before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        if base < self.max {
            let next = base.as_secs_f64() * self.multiplier;
            self.current = Duration::try_from_secs_f64(next)
                .unwrap_or(self.max)
                .min(self.max);
        }

        if self.jitter <= 0.0 {
            return base;
        }
        let extra = base.mul_f64(self.jitter * rand::thread_rng().gen::<f64>());
        base + extra
    }

    /// Restart the schedule after a successful connection
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
