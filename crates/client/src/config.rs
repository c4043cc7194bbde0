//! Client configuration from environment variables.

use std::sync::Arc;
use std::time::Duration;

use chatwire_shared::ConfigError;

use crate::ws::{
    HeartbeatConfig, ReconnectConfig, ScriptedTransport, Transport, WebSocketTransport,
    MAX_RECONNECT_ATTEMPTS,
};

pub const DEFAULT_WS_URL: &str = "ws://localhost:3001";

/// Which transport implementation the manager is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Real WebSocket connection.
    #[default]
    WebSocket,
    /// In-process transport that answers like a minimal server, for running
    /// without one.
    Scripted,
}

impl TransportKind {
    pub fn build(&self) -> Arc<dyn Transport> {
        match self {
            TransportKind::WebSocket => Arc::new(WebSocketTransport::new()),
            TransportKind::Scripted => Arc::new(ScriptedTransport::auto_responder()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base WebSocket endpoint; credentials are appended as query parameters
    pub ws_url: String,
    pub transport: TransportKind,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            transport: TransportKind::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CHATWIRE_WS_URL`: base endpoint (default: "ws://localhost:3001")
    /// - `CHATWIRE_TRANSPORT`: "websocket" | "scripted" (default: "websocket")
    /// - `CHATWIRE_MAX_RECONNECT_ATTEMPTS`: attempt ceiling (default: 5, at most 32)
    /// - `CHATWIRE_RECONNECT_BASE_MS`: first backoff delay (default: 1000)
    /// - `CHATWIRE_HEARTBEAT_INTERVAL_MS`: heartbeat period (default: 10000)
    /// - `CHATWIRE_HEARTBEAT_STALE_MS`: staleness threshold (default: 30000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ws_url = lookup("CHATWIRE_WS_URL").unwrap_or(defaults.ws_url);

        let transport = match lookup("CHATWIRE_TRANSPORT")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            None | Some("websocket") => TransportKind::WebSocket,
            Some("scripted") => TransportKind::Scripted,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "CHATWIRE_TRANSPORT".to_string(),
                    value: other.to_string(),
                    expected: "\"websocket\" or \"scripted\"",
                })
            }
        };

        let max_attempts = parse_u64(&lookup, "CHATWIRE_MAX_RECONNECT_ATTEMPTS")?
            .map(|v| {
                u32::try_from(v).map_err(|_| ConfigError::InvalidValue {
                    key: "CHATWIRE_MAX_RECONNECT_ATTEMPTS".to_string(),
                    value: v.to_string(),
                    expected: "a 32-bit unsigned integer",
                })
            })
            .transpose()?
            .unwrap_or(defaults.reconnect.max_attempts);
        if max_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(ConfigError::InvalidValue {
                key: "CHATWIRE_MAX_RECONNECT_ATTEMPTS".to_string(),
                value: max_attempts.to_string(),
                expected: "at most 32",
            });
        }

        let base_delay = parse_millis(&lookup, "CHATWIRE_RECONNECT_BASE_MS")?
            .unwrap_or(defaults.reconnect.base_delay);
        let interval = parse_millis(&lookup, "CHATWIRE_HEARTBEAT_INTERVAL_MS")?
            .unwrap_or(defaults.heartbeat.interval);
        let stale_after = parse_millis(&lookup, "CHATWIRE_HEARTBEAT_STALE_MS")?
            .unwrap_or(defaults.heartbeat.stale_after);

        if interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CHATWIRE_HEARTBEAT_INTERVAL_MS".to_string(),
                value: "0".to_string(),
                expected: "greater than zero",
            });
        }

        Ok(Self {
            ws_url,
            transport,
            reconnect: ReconnectConfig {
                max_attempts,
                base_delay,
            },
            heartbeat: HeartbeatConfig {
                interval,
                stale_after,
            },
        })
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.clone(),
                    expected: "an unsigned integer",
                })
        })
        .transpose()
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_u64(lookup, key)?.map(Duration::from_millis))
}
