//! Shared error types for the real-time connection.

use thiserror::Error;

/// Opening the transport failed.
///
/// `Clone` because one in-flight connect attempt is shared by every caller
/// that asked for it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
    #[error("transport failed to open: {0}")]
    Transport(String),
    #[error("connect cancelled by disconnect")]
    Cancelled,
}

/// An inbound frame that could not be turned into a payload.
///
/// Never leaves the connection manager: the frame is logged and dropped.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("frame is not valid json: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame has no `type` field")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FrameDecodeError {
    /// Unknown types are expected as servers grow new events; everything
    /// else indicates a broken peer.
    pub fn is_forward_compatible(&self) -> bool {
        matches!(self, FrameDecodeError::UnknownType(_))
    }
}

/// Configuration value could not be used.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got `{value}`")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}
