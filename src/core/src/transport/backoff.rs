use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter and no attempt limit.
///
/// Each delay is `base * 2^attempt` (capped at `max`) plus a random jitter in
/// `[0.3 * base, 3 * base)`. With a one second base this is the graphql-ws
/// client default of 300..3000ms jitter.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Number of consecutive failures since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt, advancing the failure count.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = if self.base.is_zero() {
            Duration::ZERO
        } else {
            let low = self.base.mul_f64(0.3);
            let high = self.base.saturating_mul(3);
            rand::thread_rng().gen_range(low..high)
        };
        self.next_delay_with_jitter(jitter)
    }

    fn next_delay_with_jitter(&mut self, jitter: Duration) -> Duration {
        let factor = 1u32 << self.attempt.min(16);
        let exp = self.base.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        exp + jitter
    }
}
