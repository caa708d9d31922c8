// clipkeeper - Backoff Policy
// Capped exponential delays shared by the gateway, health monitor, and supervisor

use std::time::Duration;

/// Exponential backoff: attempt `n` waits `base * 2^n`, clamped to `cap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(2),
            max_attempts: 20,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match 2u32.checked_pow(attempt) {
            Some(factor) => self.base.saturating_mul(factor).min(self.cap),
            None => self.cap,
        }
    }

    /// The full delay schedule, one entry per attempt
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(|attempt| self.delay(attempt))
    }

    /// Upper bound on time spent sleeping across all attempts
    pub fn total(&self) -> Duration {
        self.delays().fold(Duration::ZERO, Duration::saturating_add)
    }
}
