//! Connection status indicator.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::EventStore;
use crate::ws::{Event, EventKind};

/// Connection state for UI display
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

#[derive(Debug, Default)]
struct Status {
    state: ConnectionState,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct StatusTracker {
    status: Mutex<Status>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// The application is about to call `connect`. No event announces this.
    pub fn mark_connecting(&self) {
        let mut status = self.lock();
        if !status.state.is_connected() {
            status.state = ConnectionState::Connecting;
        }
    }
}

impl EventStore for StatusTracker {
    const KINDS: &'static [EventKind] = &[
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Error,
        EventKind::MaxReconnectAttemptsReached,
    ];

    fn apply(&self, event: &Event) {
        let mut status = self.lock();
        match event {
            Event::Connected => {
                status.state = ConnectionState::Connected;
                status.last_error = None;
            }
            Event::Disconnected { .. } => status.state = ConnectionState::Disconnected,
            Event::Reconnecting { attempt, .. } => {
                status.state = ConnectionState::Reconnecting { attempt: *attempt }
            }
            Event::Error { message } => {
                status.last_error = Some(message.clone());
                if status.state == ConnectionState::Connecting {
                    status.state = ConnectionState::Disconnected;
                }
            }
            Event::MaxReconnectAttemptsReached { attempts } => {
                status.state = ConnectionState::Failed {
                    reason: format!("Gave up after {} reconnection attempts", attempts),
                };
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn follows_a_reconnect_cycle() {
        let tracker = StatusTracker::new();
        tracker.mark_connecting();
        assert!(tracker.state().is_connecting());

        tracker.apply(&Event::Connected);
        assert!(tracker.state().is_connected());

        tracker.apply(&Event::Disconnected {
            code: 1006,
            reason: String::new(),
        });
        tracker.apply(&Event::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1),
        });
        assert_eq!(tracker.state(), ConnectionState::Reconnecting { attempt: 1 });

        tracker.apply(&Event::MaxReconnectAttemptsReached { attempts: 5 });
        assert!(matches!(tracker.state(), ConnectionState::Failed { .. }));
    }

    #[test]
    fn failed_initial_connect_records_error() {
        let tracker = StatusTracker::new();
        tracker.mark_connecting();
        tracker.apply(&Event::Error {
            message: "refused".into(),
        });
        assert_eq!(tracker.state(), ConnectionState::Disconnected);
        assert_eq!(tracker.last_error().as_deref(), Some("refused"));

        tracker.apply(&Event::Connected);
        assert_eq!(tracker.last_error(), None);
    }

    #[test]
    fn mark_connecting_keeps_connected() {
        let tracker = StatusTracker::new();
        tracker.apply(&Event::Connected);
        tracker.mark_connecting();
        assert!(tracker.state().is_connected());
    }
}
