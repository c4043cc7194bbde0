//! Envelope codec for the chatwire wire protocol.
//!
//! Every frame in either direction is a JSON text frame of the shape
//! `{"type": "<tag>", "payload": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FrameDecodeError;
use crate::models::{
    ChatMessage, EntityId, HeartbeatAck, Membership, Notice, PresenceChange, PresenceStatus, Room,
    RoomRemoved, TypingNotice, UploadedFile,
};

/// Close code for a caller-initiated, normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code the heartbeat monitor uses when it gives up on a silent peer.
pub const CLOSE_STALE: u16 = 4000;

/// Default message type for `send_message`.
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

// --- Outbound ---

/// An outbound intent. Built by the caller and serialized immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_id: EntityId,
        message: String,
        message_type: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: EntityId },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: EntityId },
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        room_name: String,
        is_private: bool,
        participants: Vec<EntityId>,
    },
    #[serde(rename_all = "camelCase")]
    Typing { room_id: EntityId, is_typing: bool },
    PresenceUpdate { status: PresenceStatus },
    /// Liveness ping; `timestamp` is epoch milliseconds.
    Heartbeat { timestamp: i64 },
}

impl ClientCommand {
    /// Wire tag of this intent.
    pub fn tag(&self) -> &'static str {
        match self {
            ClientCommand::SendMessage { .. } => "send_message",
            ClientCommand::JoinRoom { .. } => "join_room",
            ClientCommand::LeaveRoom { .. } => "leave_room",
            ClientCommand::CreateRoom { .. } => "create_room",
            ClientCommand::Typing { .. } => "typing",
            ClientCommand::PresenceUpdate { .. } => "presence_update",
            ClientCommand::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn heartbeat_now() -> Self {
        ClientCommand::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Serialize an intent into a text frame.
pub fn encode(cmd: &ClientCommand) -> Result<String, serde_json::Error> {
    serde_json::to_string(cmd)
}

// --- Inbound ---

/// A decoded inbound payload, ready for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
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
    Heartbeat(HeartbeatAck),
    UserStatusChange(PresenceChange),
}

impl ServerEvent {
    /// Serialize as a server would send it. Used by scripted peers.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound frame kinds the client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
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
    Heartbeat,
    UserStatusChange,
}

/// Wire tag to kind. Tags not listed here are dropped on decode.
const INBOUND_TAGS: &[(&str, InboundKind)] = &[
    ("message", InboundKind::Message),
    ("typing", InboundKind::Typing),
    ("typing_start", InboundKind::TypingStart),
    ("typing_stop", InboundKind::TypingStop),
    ("user_joined", InboundKind::UserJoined),
    ("user_left", InboundKind::UserLeft),
    ("presence_update", InboundKind::PresenceUpdate),
    ("room_created", InboundKind::RoomCreated),
    ("room_deleted", InboundKind::RoomDeleted),
    ("file_uploaded", InboundKind::FileUploaded),
    ("notification", InboundKind::Notification),
    ("heartbeat", InboundKind::Heartbeat),
    ("user_status_change", InboundKind::UserStatusChange),
];

impl InboundKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        INBOUND_TAGS
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, kind)| *kind)
    }

    pub fn tag(&self) -> &'static str {
        INBOUND_TAGS
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(t, _)| *t)
            .unwrap_or("unknown")
    }

    fn parse(self, payload: serde_json::Value) -> Result<ServerEvent, serde_json::Error> {
        use serde_json::from_value;
        Ok(match self {
            InboundKind::Message => ServerEvent::Message(from_value(payload)?),
            InboundKind::Typing => ServerEvent::Typing(from_value(payload)?),
            InboundKind::TypingStart => ServerEvent::TypingStart(from_value(payload)?),
            InboundKind::TypingStop => ServerEvent::TypingStop(from_value(payload)?),
            InboundKind::UserJoined => ServerEvent::UserJoined(from_value(payload)?),
            InboundKind::UserLeft => ServerEvent::UserLeft(from_value(payload)?),
            InboundKind::PresenceUpdate => ServerEvent::PresenceUpdate(from_value(payload)?),
            InboundKind::RoomCreated => ServerEvent::RoomCreated(from_value(payload)?),
            InboundKind::RoomDeleted => ServerEvent::RoomDeleted(from_value(payload)?),
            InboundKind::FileUploaded => ServerEvent::FileUploaded(from_value(payload)?),
            InboundKind::Notification => ServerEvent::Notification(from_value(payload)?),
            InboundKind::Heartbeat => ServerEvent::Heartbeat(from_value(payload)?),
            InboundKind::UserStatusChange => ServerEvent::UserStatusChange(from_value(payload)?),
        })
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Parse an inbound text frame.
///
/// Fails closed: any problem is returned as a [`FrameDecodeError`] and the
/// caller drops the frame.
pub fn decode(text: &str) -> Result<ServerEvent, FrameDecodeError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(FrameDecodeError::Malformed)?;
    let tag = raw.kind.ok_or(FrameDecodeError::MissingType)?;
    let kind = InboundKind::from_tag(&tag).ok_or_else(|| FrameDecodeError::UnknownType(tag.clone()))?;

    let payload = match raw.payload {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    };

    kind.parse(payload)
        .map_err(|source| FrameDecodeError::InvalidPayload { kind: tag, source })
}
