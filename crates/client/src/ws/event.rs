//! Events published to subscribers.

use std::time::Duration;

use chatwire_shared::{
    ChatMessage, Membership, Notice, PresenceChange, Room, RoomRemoved, ServerEvent, TypingNotice,
    UploadedFile,
};

/// Everything a subscriber can observe: connection lifecycle plus decoded
/// server events.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Disconnected { code: u16, reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Error { message: String },
    MaxReconnectAttemptsReached { attempts: u32 },
    Message(ChatMessage),
    Typing(TypingNotice),
    TypingStart(TypingNotice),
    TypingStop(TypingNotice),
    UserJoined(Membership),
    UserLeft(Membership),
    PresenceUpdate(PresenceChange),
    RoomCreated(Room),
    RoomDeleted(RoomRemoved),
    FileUploaded(UploadedFile),
    Notification(Notice),
    UserStatusChange(PresenceChange),
}

/// Subscription key: one per [`Event`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Error,
    MaxReconnectAttemptsReached,
    Message,
    Typing,
    TypingStart,
    TypingStop,
    UserJoined,
    UserLeft,
    PresenceUpdate,
    RoomCreated,
    RoomDeleted,
    FileUploaded,
    Notification,
    UserStatusChange,
}

impl EventKind {
    pub const ALL: [EventKind; 17] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Error,
        EventKind::MaxReconnectAttemptsReached,
        EventKind::Message,
        EventKind::Typing,
        EventKind::TypingStart,
        EventKind::TypingStop,
        EventKind::UserJoined,
        EventKind::UserLeft,
        EventKind::PresenceUpdate,
        EventKind::RoomCreated,
        EventKind::RoomDeleted,
        EventKind::FileUploaded,
        EventKind::Notification,
        EventKind::UserStatusChange,
    ];

    /// Canonical event name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Reconnecting => "reconnecting",
            EventKind::Error => "error",
            EventKind::MaxReconnectAttemptsReached => "maxReconnectAttemptsReached",
            EventKind::Message => "message",
            EventKind::Typing => "typing",
            EventKind::TypingStart => "typingStart",
            EventKind::TypingStop => "typingStop",
            EventKind::UserJoined => "userJoined",
            EventKind::UserLeft => "userLeft",
            EventKind::PresenceUpdate => "presenceUpdate",
            EventKind::RoomCreated => "roomCreated",
            EventKind::RoomDeleted => "roomDeleted",
            EventKind::FileUploaded => "fileUploaded",
            EventKind::Notification => "notification",
            EventKind::UserStatusChange => "userStatusChange",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::Reconnecting { .. } => EventKind::Reconnecting,
            Event::Error { .. } => EventKind::Error,
            Event::MaxReconnectAttemptsReached { .. } => EventKind::MaxReconnectAttemptsReached,
            Event::Message(_) => EventKind::Message,
            Event::Typing(_) => EventKind::Typing,
            Event::TypingStart(_) => EventKind::TypingStart,
            Event::TypingStop(_) => EventKind::TypingStop,
            Event::UserJoined(_) => EventKind::UserJoined,
            Event::UserLeft(_) => EventKind::UserLeft,
            Event::PresenceUpdate(_) => EventKind::PresenceUpdate,
            Event::RoomCreated(_) => EventKind::RoomCreated,
            Event::RoomDeleted(_) => EventKind::RoomDeleted,
            Event::FileUploaded(_) => EventKind::FileUploaded,
            Event::Notification(_) => EventKind::Notification,
            Event::UserStatusChange(_) => EventKind::UserStatusChange,
        }
    }

    /// Map a decoded server event to what subscribers see. Heartbeats are
    /// consumed by the connection itself and map to `None`.
    pub fn from_server(event: ServerEvent) -> Option<Self> {
        Some(match event {
            ServerEvent::Message(m) => Event::Message(m),
            ServerEvent::Typing(t) => Event::Typing(t),
            ServerEvent::TypingStart(t) => Event::TypingStart(t),
            ServerEvent::TypingStop(t) => Event::TypingStop(t),
            ServerEvent::UserJoined(m) => Event::UserJoined(m),
            ServerEvent::UserLeft(m) => Event::UserLeft(m),
            ServerEvent::PresenceUpdate(p) => Event::PresenceUpdate(p),
            ServerEvent::RoomCreated(r) => Event::RoomCreated(r),
            ServerEvent::RoomDeleted(r) => Event::RoomDeleted(r),
            ServerEvent::FileUploaded(f) => Event::FileUploaded(f),
            ServerEvent::Notification(n) => Event::Notification(n),
            ServerEvent::UserStatusChange(p) => Event::UserStatusChange(p),
            ServerEvent::Heartbeat(_) => return None,
        })
    }
}
