//! Deterministic in-process transport.
//!
//! Used by tests and for running the client without a server. Open
//! outcomes are queued up front (opens succeed when the queue is empty),
//! and every opened connection is driven from the outside through a
//! [`ScriptedPeer`].
//!
//! In auto-responder mode each connection also plays a minimal server:
//! heartbeats are acknowledged, sent messages are echoed back and created
//! rooms are announced. That is enough to run the client offline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chatwire_shared::{
    ChatMessage, ClientCommand, ConnectError, HeartbeatAck, Room, ServerEvent, WireTime,
};
use tokio::sync::mpsc::{self, UnboundedSender};
use url::Url;

use super::{CloseFrame, FrameSink, ReadyState, Transport, TransportEvent, TransportLink};

#[derive(Default)]
struct Script {
    outcomes: VecDeque<Result<(), String>>,
    open_delay: Option<Duration>,
    urls: Vec<Url>,
    peers: Vec<ScriptedPeer>,
    auto_respond: bool,
}

/// Transport whose behavior is scripted by the caller.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    /// Ids handed out by auto-responders, unique across connections
    next_id: Arc<AtomicI64>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose connections answer like a minimal server.
    pub fn auto_responder() -> Self {
        let transport = Self::new();
        transport.script().auto_respond = true;
        transport
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a failed open.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.script().outcomes.push_back(Err(reason.into()));
    }

    /// Queue `count` failed opens.
    pub fn fail_times(&self, count: usize, reason: &str) {
        for _ in 0..count {
            self.fail_next(reason);
        }
    }

    /// Queue a successful open (the default once the queue is empty).
    pub fn succeed_next(&self) {
        self.script().outcomes.push_back(Ok(()));
    }

    /// Make every open take `delay` before resolving.
    pub fn set_open_delay(&self, delay: Duration) {
        self.script().open_delay = Some(delay);
    }

    /// Number of open attempts so far, successful or not.
    pub fn open_count(&self) -> usize {
        self.script().urls.len()
    }

    /// URLs of every open attempt, in order.
    pub fn urls(&self) -> Vec<Url> {
        self.script().urls.clone()
    }

    /// Peer for the n-th successfully opened connection.
    pub fn peer(&self, index: usize) -> Option<ScriptedPeer> {
        self.script().peers.get(index).cloned()
    }

    pub fn last_peer(&self) -> Option<ScriptedPeer> {
        self.script().peers.last().cloned()
    }

    pub fn peer_count(&self) -> usize {
        self.script().peers.len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink, ConnectError> {
        let (delay, outcome, auto_respond) = {
            let mut script = self.script();
            script.urls.push(url.clone());
            (
                script.open_delay,
                script.outcomes.pop_front().unwrap_or(Ok(())),
                script.auto_respond,
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Err(reason) = outcome {
            crate::log_debug!("Scripted open failed: {}", reason);
            return Err(ConnectError::Transport(reason));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = ScriptedPeer {
            shared: Arc::new(PeerShared {
                events: events_tx,
                state: AtomicU8::new(ReadyState::Open as u8),
                sent: Mutex::new(Vec::new()),
                closed_by_client: Mutex::new(None),
                responder: auto_respond.then(|| self.next_id.clone()),
            }),
        };
        self.script().peers.push(peer.clone());

        Ok(TransportLink {
            sink: Arc::new(ScriptedSink {
                shared: peer.shared.clone(),
            }),
            events: events_rx,
        })
    }
}

struct PeerShared {
    events: UnboundedSender<TransportEvent>,
    state: AtomicU8,
    sent: Mutex<Vec<String>>,
    closed_by_client: Mutex<Option<CloseFrame>>,
    /// Present in auto-responder mode
    responder: Option<Arc<AtomicI64>>,
}

impl PeerShared {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// What a minimal server sends back for an outbound frame.
    fn reply_to(&self, frame: &str, next_id: &AtomicI64) -> Option<ServerEvent> {
        let cmd: ClientCommand = match serde_json::from_str(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                crate::log_debug!("Auto-responder ignoring unparsable frame: {}", e);
                return None;
            }
        };
        let id = || next_id.fetch_add(1, Ordering::SeqCst) + 1;
        match cmd {
            ClientCommand::Heartbeat { timestamp } => Some(ServerEvent::Heartbeat(HeartbeatAck {
                timestamp: Some(WireTime::Millis(timestamp)),
            })),
            ClientCommand::SendMessage {
                room_id,
                message,
                message_type,
                timestamp,
            } => Some(ServerEvent::Message(ChatMessage {
                id: Some(id().into()),
                room_id,
                text: message,
                sender: None,
                timestamp: Some(WireTime::Rfc3339(timestamp)),
                message_type: Some(message_type),
                extra: Default::default(),
            })),
            ClientCommand::CreateRoom {
                room_name,
                is_private,
                participants,
            } => Some(ServerEvent::RoomCreated(Room {
                id: id().into(),
                name: room_name,
                member_count: u32::try_from(participants.len() + 1).ok(),
                is_private,
                unread_count: Some(0),
                participants,
            })),
            _ => None,
        }
    }
}

/// The server side of one scripted connection.
#[derive(Clone)]
pub struct ScriptedPeer {
    shared: Arc<PeerShared>,
}

impl ScriptedPeer {
    /// Deliver a raw text frame to the client.
    pub fn push_frame(&self, text: impl Into<String>) {
        let _ = self.shared.events.send(TransportEvent::Frame(text.into()));
    }

    /// Deliver a server event, encoded as the server would.
    pub fn push_event(&self, event: &ServerEvent) {
        match event.to_frame() {
            Ok(frame) => self.push_frame(frame),
            Err(e) => crate::log_error!("Scripted event not encodable: {}", e),
        }
    }

    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self.shared.events.send(TransportEvent::Error(message.into()));
    }

    /// Server-initiated closure with the given code.
    pub fn close(&self, code: u16, reason: &str) {
        self.shared
            .state
            .store(ReadyState::Closed as u8, Ordering::SeqCst);
        let _ = self
            .shared
            .events
            .send(TransportEvent::Closed(CloseFrame::new(code, reason)));
    }

    /// Frames the client sent on this connection, in order.
    pub fn sent_frames(&self) -> Vec<String> {
        self.shared
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sent frames parsed as JSON; unparsable frames are skipped.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent_frames()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Sent frames with the given `type` tag.
    pub fn sent_of_type(&self, tag: &str) -> Vec<serde_json::Value> {
        self.sent_json()
            .into_iter()
            .filter(|v| v["type"] == tag)
            .collect()
    }

    /// How the client closed this connection, if it did.
    pub fn closed_by_client(&self) -> Option<CloseFrame> {
        self.shared
            .closed_by_client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }
}

struct ScriptedSink {
    shared: Arc<PeerShared>,
}

impl FrameSink for ScriptedSink {
    fn send(&self, frame: String) -> bool {
        if self.shared.ready_state() != ReadyState::Open {
            return false;
        }
        self.shared
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());

        if let Some(next_id) = &self.shared.responder {
            if let Some(reply) = self.shared.reply_to(&frame, next_id) {
                match reply.to_frame() {
                    Ok(text) => {
                        let _ = self.shared.events.send(TransportEvent::Frame(text));
                    }
                    Err(e) => crate::log_error!("Auto-responder reply not encodable: {}", e),
                }
            }
        }
        true
    }

    fn close(&self, code: u16, reason: &str) {
        if self.shared.ready_state() == ReadyState::Closed {
            return;
        }
        self.shared
            .state
            .store(ReadyState::Closed as u8, Ordering::SeqCst);
        *self
            .shared
            .closed_by_client
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(CloseFrame::new(code, reason));
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }
}
