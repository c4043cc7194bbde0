//! Message store for room messages.
//!
//! This store is the single source of truth for messages across rooms.
//! Messages are organized by room id, and each room tracks whether its
//! history has been loaded.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chatwire_shared::{ChatMessage, EntityId, UserSummary, DEFAULT_MESSAGE_TYPE};
use chrono::{DateTime, Utc};

use super::EventStore;
use crate::ws::{Event, EventKind};

/// A message as kept in the store, whether it came from history or the
/// live stream.
#[derive(Clone, PartialEq, Debug)]
pub struct StoredMessage {
    pub id: Option<EntityId>,
    pub room_id: EntityId,
    pub sender: Option<UserSummary>,
    pub text: String,
    pub message_type: String,
    /// Server timestamp, or the time it was received when the server sent none
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn from_wire(msg: &ChatMessage, received_at: DateTime<Utc>) -> Self {
        Self {
            id: msg.id.clone(),
            room_id: msg.room_id.clone(),
            sender: msg.sender.clone(),
            text: msg.text.clone(),
            message_type: msg
                .message_type
                .clone()
                .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string()),
            created_at: msg
                .timestamp
                .as_ref()
                .and_then(|t| t.to_datetime())
                .unwrap_or(received_at),
        }
    }
}

/// Messages for a single room.
#[derive(Default, Clone, PartialEq, Debug)]
pub struct RoomMessages {
    /// Sorted by created_at ascending; ties keep arrival order.
    pub messages: Vec<StoredMessage>,
    pub is_loaded: bool,
}

impl RoomMessages {
    /// Add a message, maintaining sort order by created_at.
    /// Returns false if a message with the same id already exists.
    pub fn add_message(&mut self, msg: StoredMessage) -> bool {
        if msg.id.is_some() && self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }

        let pos = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(pos, msg);
        true
    }

    /// Replace the contents with fetched history and mark the room loaded.
    /// Live messages already held that the history lacks are kept.
    pub fn set_history(&mut self, history: Vec<StoredMessage>) {
        let live = std::mem::take(&mut self.messages);
        for msg in history.into_iter().chain(live) {
            self.add_message(msg);
        }
        self.is_loaded = true;
    }
}

#[derive(Debug, Default)]
pub struct MessageStore {
    rooms: Mutex<HashMap<EntityId, RoomMessages>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<EntityId, RoomMessages>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn messages(&self, room_id: &EntityId) -> Vec<StoredMessage> {
        self.rooms()
            .get(room_id)
            .map(|room| room.messages.clone())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self, room_id: &EntityId) -> bool {
        self.rooms().get(room_id).is_some_and(|room| room.is_loaded)
    }

    pub fn add(&self, msg: StoredMessage) -> bool {
        self.rooms()
            .entry(msg.room_id.clone())
            .or_default()
            .add_message(msg)
    }

    pub fn set_history(&self, room_id: &EntityId, history: Vec<StoredMessage>) {
        self.rooms()
            .entry(room_id.clone())
            .or_default()
            .set_history(history);
    }

    pub fn remove_room(&self, room_id: &EntityId) {
        self.rooms().remove(room_id);
    }
}

impl EventStore for MessageStore {
    const KINDS: &'static [EventKind] = &[EventKind::Message, EventKind::RoomDeleted];

    fn apply(&self, event: &Event) {
        match event {
            Event::Message(msg) => {
                if !self.add(StoredMessage::from_wire(msg, Utc::now())) {
                    crate::log_debug!("Duplicate message {:?} ignored", msg.id);
                }
            }
            Event::RoomDeleted(removed) => self.remove_room(&removed.room_id),
            _ => {}
        }
    }
}
