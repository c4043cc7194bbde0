//! Shared data models for the chatwire wire protocol.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// --- Common Definitions ---

/// Identifier as it appears on the wire.
///
/// Servers are inconsistent about ids: some send numbers, some strings. Both
/// are accepted and compare equal only within the same representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum EntityId {
    Num(i64),
    Str(String),
}

impl EntityId {
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Num(n) => write!(f, "{}", n),
            EntityId::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Str(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::Str(value)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Num(value)
    }
}

/// Timestamp as it appears on the wire: either epoch milliseconds or RFC 3339.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireTime {
    Millis(i64),
    Rfc3339(DateTime<Utc>),
}

impl WireTime {
    /// Resolve to a UTC instant. Out-of-range millisecond values yield `None`.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTime::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            WireTime::Rfc3339(dt) => Some(*dt),
        }
    }
}

impl From<DateTime<Utc>> for WireTime {
    fn from(value: DateTime<Utc>) -> Self {
        WireTime::Rfc3339(value)
    }
}

/// Unknown fields a server sent alongside the known ones.
pub type Extra = serde_json::Map<String, serde_json::Value>;

// --- Presence ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    #[default]
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Busy => "busy",
            PresenceStatus::Offline => "offline",
        }
    }

    /// Human-readable label for status indicators.
    pub fn label(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "Online",
            PresenceStatus::Away => "Away",
            PresenceStatus::Busy => "Busy",
            PresenceStatus::Offline => "Offline",
        }
    }
}

impl std::str::FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceStatus::Online),
            "away" => Ok(PresenceStatus::Away),
            "busy" => Ok(PresenceStatus::Busy),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(format!("unknown presence status: {}", other)),
        }
    }
}

// --- Identity ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: EntityId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub status: Option<PresenceStatus>,
}

// --- Inbound payloads ---

/// A chat message delivered to a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub room_id: EntityId,
    /// Message body. Some servers echo it back under `message`.
    #[serde(default, alias = "message")]
    pub text: String,
    #[serde(default)]
    pub sender: Option<UserSummary>,
    #[serde(default)]
    pub timestamp: Option<WireTime>,
    #[serde(default, rename = "type", alias = "messageType")]
    pub message_type: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Someone started or stopped typing in a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: EntityId,
    #[serde(default)]
    pub user_id: Option<EntityId>,
    #[serde(default)]
    pub user: Option<UserSummary>,
    /// Only meaningful for the combined `typing` event; `typing_start` and
    /// `typing_stop` carry their state in the tag.
    #[serde(default)]
    pub is_typing: bool,
}

impl TypingNotice {
    /// The typing user's id, from `userId` or the embedded user.
    pub fn typist(&self) -> Option<&EntityId> {
        self.user_id
            .as_ref()
            .or_else(|| self.user.as_ref().map(|u| &u.id))
    }
}

/// A user joined or left (a room, or the server when `room_id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: EntityId,
    #[serde(default)]
    pub room_id: Option<EntityId>,
    #[serde(default)]
    pub user: Option<UserSummary>,
}

/// A user's presence changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: EntityId,
    pub status: PresenceStatus,
    #[serde(default)]
    pub last_seen: Option<WireTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: EntityId,
    #[serde(alias = "roomName")]
    pub name: String,
    #[serde(default)]
    pub member_count: Option<u32>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub unread_count: Option<u32>,
    #[serde(default)]
    pub participants: Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomRemoved {
    #[serde(alias = "id")]
    pub room_id: EntityId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub room_id: EntityId,
    #[serde(alias = "fileName")]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "type")]
    pub mime: Option<String>,
    #[serde(default)]
    pub uploaded_by: Option<UserSummary>,
}

/// Server-pushed notification. `kind` is e.g. `message`, `mention`,
/// `room_invite`, `friend_request`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sender: Option<UserSummary>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    #[serde(default)]
    pub timestamp: Option<WireTime>,
}
