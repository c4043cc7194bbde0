//! Who is typing where, and debounced typing notices for the local user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chatwire_shared::{EntityId, TypingNotice};

use super::EventStore;
use crate::ws::{ConnectionManager, Event, EventKind, TimerSlot};

pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_secs(1);

/// Typing users per room, in the order they started typing.
#[derive(Debug, Default)]
pub struct TypingRoster {
    rooms: Mutex<HashMap<EntityId, Vec<EntityId>>>,
}

impl TypingRoster {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<EntityId, Vec<EntityId>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn typing_users(&self, room_id: &EntityId) -> Vec<EntityId> {
        self.rooms().get(room_id).cloned().unwrap_or_default()
    }

    pub fn is_typing(&self, room_id: &EntityId, user_id: &EntityId) -> bool {
        self.rooms()
            .get(room_id)
            .is_some_and(|users| users.contains(user_id))
    }

    fn set(&self, notice: &TypingNotice, typing: bool) {
        let Some(user_id) = notice.typist() else {
            crate::log_debug!("Typing notice for room {} without a user", notice.room_id);
            return;
        };
        let mut rooms = self.rooms();
        if typing {
            let users = rooms.entry(notice.room_id.clone()).or_default();
            if !users.contains(user_id) {
                users.push(user_id.clone());
            }
        } else if let Some(users) = rooms.get_mut(&notice.room_id) {
            users.retain(|u| u != user_id);
            if users.is_empty() {
                rooms.remove(&notice.room_id);
            }
        }
    }
}

impl EventStore for TypingRoster {
    const KINDS: &'static [EventKind] = &[
        EventKind::Typing,
        EventKind::TypingStart,
        EventKind::TypingStop,
        EventKind::Disconnected,
    ];

    fn apply(&self, event: &Event) {
        match event {
            Event::Typing(notice) => self.set(notice, notice.is_typing),
            Event::TypingStart(notice) => self.set(notice, true),
            Event::TypingStop(notice) => self.set(notice, false),
            // Nobody is known to be typing once the stream is gone
            Event::Disconnected { .. } => self.rooms().clear(),
            _ => {}
        }
    }
}

struct Indicator {
    typing: bool,
    stop_timer: TimerSlot,
}

/// Debounced typing state for the local user in one room.
///
/// The first `start_typing` sends `isTyping: true`; each call pushes the
/// automatic stop out by the debounce delay. Dropping the indicator stops
/// typing.
pub struct TypingIndicator {
    manager: ConnectionManager,
    room_id: EntityId,
    debounce: Duration,
    state: Mutex<Indicator>,
}

impl TypingIndicator {
    pub fn new(manager: ConnectionManager, room_id: impl Into<EntityId>, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            manager,
            room_id: room_id.into(),
            debounce,
            state: Mutex::new(Indicator {
                typing: false,
                stop_timer: TimerSlot::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Indicator> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_typing(&self) -> bool {
        self.lock().typing
    }

    /// A keystroke. Must be called from within a tokio runtime.
    pub fn start_typing(self: &Arc<Self>) {
        let started = {
            let mut state = self.lock();
            let started = !std::mem::replace(&mut state.typing, true);
            let weak: Weak<Self> = Arc::downgrade(self);
            state.stop_timer.schedule(self.debounce, move || {
                if let Some(indicator) = weak.upgrade() {
                    indicator.finish();
                }
            });
            started
        };
        if started {
            self.manager.send_typing(self.room_id.clone(), true);
        }
    }

    /// Stop now, e.g. when the message is sent.
    pub fn stop_typing(&self) {
        self.lock().stop_timer.cancel();
        self.finish();
    }

    fn finish(&self) {
        let was_typing = std::mem::replace(&mut self.lock().typing, false);
        if was_typing {
            self.manager.send_typing(self.room_id.clone(), false);
        }
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.stop_typing();
    }
}
