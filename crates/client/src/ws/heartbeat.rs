//! Heartbeat monitor: periodic liveness pings and staleness detection.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often a heartbeat is sent while connected
    pub interval: Duration,
    /// Silence longer than this marks the connection stale
    pub stale_after: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Liveness bookkeeping for one connection. Created on open, dropped with
/// the session so its ticker never outlives the transport.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_seen: Instant,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig, opened_at: Instant) -> Self {
        Self {
            config,
            last_seen: opened_at,
        }
    }

    /// An inbound heartbeat arrived.
    pub fn record(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.silence(now) > self.config.stale_after
    }

    /// Ticker whose first tick is one interval after now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}
