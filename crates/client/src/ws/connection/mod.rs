//! Transport abstraction: one physical connection carrying text frames.
//!
//! This module provides the shared types and the two implementations:
//! a real WebSocket transport and a scripted transport for tests and
//! offline development. The connection manager only ever sees the
//! [`Transport`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use chatwire_shared::{ConnectError, CLOSE_ABNORMAL, CLOSE_NORMAL};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

/// WebSocket-compatible ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Close code and reason of a finished connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The peer vanished without a close handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }
}

/// Something the transport observed on an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(String),
    Error(String),
    Closed(CloseFrame),
}

/// Write half of an open connection.
pub trait FrameSink: Send + Sync {
    /// Hand a text frame to the socket layer. Returns false without blocking
    /// if the connection is not open.
    fn send(&self, frame: String) -> bool;

    /// Request closure. Safe to call on an already closed connection.
    fn close(&self, code: u16, reason: &str);

    fn ready_state(&self) -> ReadyState;
}

/// An open connection: the write half plus the ordered stream of what
/// the transport observed.
pub struct TransportLink {
    pub sink: Arc<dyn FrameSink>,
    pub events: UnboundedReceiver<TransportEvent>,
}

/// Opens connections to one kind of endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<TransportLink, ConnectError>;
}

/// Credentials carried on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

/// Build the endpoint URL, passing credentials as query parameters
/// (`?userId=<id>&token=<token>`). An empty user id is omitted.
pub fn endpoint_url(base: &str, credentials: &Credentials) -> Result<Url, ConnectError> {
    let mut url =
        Url::parse(base).map_err(|e| ConnectError::InvalidUrl(format!("{}: {}", base, e)))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConnectError::InvalidUrl(format!(
            "{}: scheme must be ws or wss",
            base
        )));
    }

    {
        let mut query = url.query_pairs_mut();
        if !credentials.user_id.is_empty() {
            query.append_pair("userId", &credentials.user_id);
        }
        query.append_pair("token", &credentials.token);
    }

    Ok(url)
}

/// Endpoint description safe for logs (no query credentials).
pub(crate) fn redacted(url: &Url) -> String {
    format!(
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.port().map(|p| format!(":{}", p)).unwrap_or_default()
    ) + url.path()
}

// Platform-specific implementations
mod connection_native;
mod connection_scripted;

pub use connection_native::{WebSocketTransport, CLOSE_REPLY_TIMEOUT};
pub use connection_scripted::{ScriptedPeer, ScriptedTransport};
