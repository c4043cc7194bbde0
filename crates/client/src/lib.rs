//! Chatwire client
//!
//! Real-time connection layer for the chatwire chat service: one shared
//! WebSocket connection with automatic reconnection, heartbeats and typed
//! event fan-out, plus the small stores most applications fold events into.

pub mod config;
pub mod logging;
pub mod stores;
pub mod ws;

pub use config::{ClientConfig, TransportKind};
pub use logging::init_tracing;
pub use ws::{ConnectionManager, ConnectionSnapshot, Event, EventKind, Subscription};
