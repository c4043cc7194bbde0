//! Real-time connection to the chat server.
//!
//! This module provides:
//! - A transport abstraction with WebSocket and scripted implementations
//! - Auto-reconnect with exponential backoff and an attempt ceiling
//! - Heartbeat-based staleness detection
//! - Typed publish/subscribe delivery of server events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ConnectionManager                   │
//! │  connect / disconnect / send intents / on / off     │
//! └─────────────────────────────────────────────────────┘
//!        │                  │                  │
//!        ▼                  ▼                  ▼
//!  ┌────────────┐   ┌───────────────┐   ┌────────────┐
//!  │ Transport  │   │ReconnectPolicy│   │ Dispatcher │
//!  │ (+session, │   │ (+TimerSlot)  │   │            │
//!  │ heartbeat) │   └───────────────┘   └────────────┘
//!  └────────────┘                             │
//!        │  frames ──► codec ──► Event ───────┘
//!        ▼                                    ▼
//!   server                         subscribers (stores, UI)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = ConnectionManager::from_config(ClientConfig::from_env()?);
//! let _sub = manager.on_fn(EventKind::Message, |event| {
//!     if let Event::Message(msg) = event {
//!         println!("{}: {}", msg.room_id, msg.text);
//!     }
//! });
//! manager.connect("u1", "token").await?;
//! manager.send_message("room1", "hi", DEFAULT_MESSAGE_TYPE);
//! ```

mod connection;
mod dispatcher;
mod event;
mod heartbeat;
mod manager;
mod reconnect;
mod timer;

// Re-export connection types
pub use connection::{
    endpoint_url, CloseFrame, Credentials, FrameSink, ReadyState, ScriptedPeer,
    ScriptedTransport, Transport, TransportEvent, TransportLink, WebSocketTransport,
    CLOSE_REPLY_TIMEOUT,
};

pub use dispatcher::{Dispatcher, Handler, Subscription};
pub use event::{Event, EventKind};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use manager::{ConnectionManager, ConnectionSnapshot};
pub use reconnect::{
    PolicyState, ReconnectConfig, ReconnectDecision, ReconnectPolicy, MAX_RECONNECT_ATTEMPTS,
};
pub use timer::TimerSlot;
