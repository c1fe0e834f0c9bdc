//! Exponential retry backoff shared by the Wi-Fi and transport domains.

pub const BACKOFF_BASE_MS: u64 = 1_000;
pub const BACKOFF_MAX_MS: u64 = 20_000;
pub const BACKOFF_MAX_ATTEMPTS: u8 = 10;

/// Delay before attempt `attempts + 1`, i.e. after `attempts` failures.
/// 1000, 2000, 4000, 8000, 16000, then capped at 20000 ms.
pub fn backoff_delay_ms(attempts: u8) -> u64 {
    if attempts == 0 {
        return 0;
    }
    let shift = u32::from(attempts - 1).min(5);
    (BACKOFF_BASE_MS << shift).min(BACKOFF_MAX_MS)
}

/// Per-domain retry bookkeeping. The counter wraps back to zero after
/// `BACKOFF_MAX_ATTEMPTS` failures so retrying continues indefinitely;
/// nothing in the system gives up permanently.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryState {
    attempts: u8,
    last_attempt_ms: u64,
}

impl RetryState {
    pub const fn new() -> Self {
        Self {
            attempts: 0,
            last_attempt_ms: 0,
        }
    }

    pub const fn attempts(&self) -> u8 {
        self.attempts
    }

    /// True when enough backoff has elapsed for another attempt.
    pub fn ready(&self, now_ms: u64) -> bool {
        if self.attempts == 0 {
            return true;
        }
        now_ms.saturating_sub(self.last_attempt_ms) >= backoff_delay_ms(self.attempts)
    }

    pub fn record_failure(&mut self, now_ms: u64) {
        self.last_attempt_ms = now_ms;
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= BACKOFF_MAX_ATTEMPTS {
            self.attempts = 0;
        }
    }

    pub fn record_success(&mut self) {
        self.attempts = 0;
    }
}
