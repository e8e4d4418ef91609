use std::time::Duration;

/// Exponential reconnect backoff with a cap and proportional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Extra random delay as a fraction of the computed delay, in `[0, 1]`.
    pub jitter_factor: f64,
    /// Additional attempts after the first failure. 0 makes failures fatal.
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.2,
            max_retries: 0,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based). Never exceeds
    /// `max_delay`, whatever the configured values.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap = self.max_delay.as_secs_f64();
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(cap);

        let secs = if self.jitter_factor > 0.0 {
            let jitter = fastrand::f64() * self.jitter_factor.min(1.0);
            (base * (1.0 + jitter)).min(cap)
        } else {
            base
        };

        // Stay in f64 until here: Duration's float constructors and
        // multipliers panic when the result does not fit.
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}
