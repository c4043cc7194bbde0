//! Reconnection policy: exponential backoff bounded by an attempt ceiling.

use std::time::Duration;

/// Highest attempt ceiling. Attempt 32 waits `base * 2^31`; beyond that the
/// exponent would saturate and delays would stop doubling.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 32;

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Scheduling decisions allowed before giving up, at most
    /// [`MAX_RECONNECT_ATTEMPTS`]
    pub max_attempts: u32,
    /// Delay before the first reopen; doubles on every further attempt
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectConfig {
    /// Delay for a 1-based attempt number: `base * 2^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt
            .saturating_sub(1)
            .min(MAX_RECONNECT_ATTEMPTS - 1);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    Idle,
    Connected,
    Reconnecting,
    Exhausted,
}

/// What to do after an abnormal closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Attempt bookkeeping. Pure state; the connection manager owns the timers.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
    state: PolicyState,
}

impl ReconnectPolicy {
    pub fn new(mut config: ReconnectConfig) -> Self {
        if config.max_attempts > MAX_RECONNECT_ATTEMPTS {
            crate::log_warn!(
                "Reconnect ceiling {} lowered to {}",
                config.max_attempts,
                MAX_RECONNECT_ATTEMPTS
            );
            config.max_attempts = MAX_RECONNECT_ATTEMPTS;
        }
        Self {
            config,
            attempts: 0,
            state: PolicyState::Idle,
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    /// A connection opened: the attempt counter starts over.
    pub fn on_open(&mut self) {
        self.attempts = 0;
        self.state = PolicyState::Connected;
    }

    /// A connection closed abnormally or a reopen failed.
    pub fn on_abnormal_close(&mut self) -> ReconnectDecision {
        if self.attempts >= self.config.max_attempts {
            self.state = PolicyState::Exhausted;
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.state = PolicyState::Reconnecting;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.config.delay_for_attempt(self.attempts),
        }
    }

    /// Explicit connect or disconnect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.state = PolicyState::Idle;
    }
}
