//! Connection manager: the one object the application holds.
//!
//! Composes the transport, reconnection policy, heartbeat monitor, envelope
//! codec and dispatcher. Create it at startup, hand clones to whatever needs
//! to send or subscribe, and call [`ConnectionManager::shutdown`] on exit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatwire_shared::{
    encode, ClientCommand, ConnectError, EntityId, PresenceStatus, ServerEvent, CLOSE_NORMAL,
    CLOSE_STALE,
};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use super::connection::{
    endpoint_url, redacted, CloseFrame, Credentials, FrameSink, ReadyState, Transport,
    TransportEvent,
};
use super::dispatcher::{Dispatcher, Handler, Subscription};
use super::event::{Event, EventKind};
use super::heartbeat::HeartbeatMonitor;
use super::reconnect::{PolicyState, ReconnectDecision, ReconnectPolicy};
use super::timer::TimerSlot;
use crate::config::ClientConfig;

type PendingConnect = Shared<BoxFuture<'static, Result<(), ConnectError>>>;

/// Point-in-time view of the connection, safe to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub ready_state: ReadyState,
    pub policy: PolicyState,
}

struct State {
    /// Bumped by explicit connect, disconnect and every successful open.
    /// Work started under an older value is discarded.
    generation: u64,
    credentials: Option<Credentials>,
    sink: Option<Arc<dyn FrameSink>>,
    connected: bool,
    policy: ReconnectPolicy,
    pending_connect: Option<PendingConnect>,
    reconnect_timer: TimerSlot,
    session: TimerSlot,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<State>,
    /// Held while a session checks its generation and dispatches a frame,
    /// so a superseded session can never interleave with a newer one.
    dispatch_gate: Mutex<()>,
}

/// Cloneable handle to the shared connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                dispatcher: Arc::new(Dispatcher::new()),
                state: Mutex::new(State {
                    generation: 0,
                    credentials: None,
                    sink: None,
                    connected: false,
                    policy,
                    pending_connect: None,
                    reconnect_timer: TimerSlot::new(),
                    session: TimerSlot::new(),
                }),
                dispatch_gate: Mutex::new(()),
            }),
        }
    }

    /// Build with the transport the configuration selects.
    pub fn from_config(config: ClientConfig) -> Self {
        let transport = config.transport.build();
        Self::new(config, transport)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open the connection.
    ///
    /// While an attempt is in flight every caller shares its outcome instead
    /// of opening a second transport. Resolves immediately when already
    /// connected. A failed open is returned to the caller and not retried;
    /// automatic reconnection only follows a successful open.
    pub async fn connect(&self, user_id: &str, token: &str) -> Result<(), ConnectError> {
        let pending = {
            let mut state = self.inner.lock_state();
            if let Some(pending) = &state.pending_connect {
                pending.clone()
            } else if state.connected {
                return Ok(());
            } else {
                state.reconnect_timer.cancel();
                state.policy.reset();
                state.generation += 1;
                let credentials = Credentials::new(user_id, token);
                state.credentials = Some(credentials.clone());
                Inner::start_attempt(&self.inner, &mut state, credentials)
            }
        };
        pending.await
    }

    /// Close with a normal closure and stop all timers. Always safe.
    /// Subscribers stay registered.
    pub fn disconnect(&self) {
        let (sink, was_connected) = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            state.pending_connect = None;
            state.reconnect_timer.cancel();
            state.session.cancel();
            state.policy.reset();
            state.credentials = None;
            let was_connected = std::mem::replace(&mut state.connected, false);
            (state.sink.take(), was_connected)
        };

        if let Some(sink) = sink {
            sink.close(CLOSE_NORMAL, "Client disconnecting");
        }
        if was_connected {
            crate::log_info!("WebSocket disconnected by client");
            self.inner.emit(Event::Disconnected {
                code: CLOSE_NORMAL,
                reason: "Client disconnecting".to_string(),
            });
        }
    }

    /// Disconnect and drop every subscriber. For application teardown.
    pub fn shutdown(&self) {
        self.disconnect();
        self.inner.dispatcher.clear();
    }

    /// Encode and hand an intent to the transport. False when not connected;
    /// true means the socket layer accepted it, not that it was delivered.
    pub fn send(&self, cmd: &ClientCommand) -> bool {
        let frame = match encode(cmd) {
            Ok(frame) => frame,
            Err(e) => {
                crate::log_error!("Failed to encode '{}': {}", cmd.tag(), e);
                return false;
            }
        };

        let sink = {
            let state = self.inner.lock_state();
            match (&state.sink, state.connected) {
                (Some(sink), true) => sink.clone(),
                _ => {
                    crate::log_warn!("WebSocket is not connected, dropping '{}'", cmd.tag());
                    return false;
                }
            }
        };
        sink.send(frame)
    }

    pub fn send_message(
        &self,
        room_id: impl Into<EntityId>,
        message: &str,
        message_type: &str,
    ) -> bool {
        self.send(&ClientCommand::SendMessage {
            room_id: room_id.into(),
            message: message.to_string(),
            message_type: message_type.to_string(),
            timestamp: chrono::Utc::now(),
        })
    }

    pub fn join_room(&self, room_id: impl Into<EntityId>) -> bool {
        self.send(&ClientCommand::JoinRoom {
            room_id: room_id.into(),
        })
    }

    pub fn leave_room(&self, room_id: impl Into<EntityId>) -> bool {
        self.send(&ClientCommand::LeaveRoom {
            room_id: room_id.into(),
        })
    }

    pub fn create_room(&self, name: &str, is_private: bool, participants: Vec<EntityId>) -> bool {
        self.send(&ClientCommand::CreateRoom {
            room_name: name.to_string(),
            is_private,
            participants,
        })
    }

    pub fn send_typing(&self, room_id: impl Into<EntityId>, is_typing: bool) -> bool {
        self.send(&ClientCommand::Typing {
            room_id: room_id.into(),
            is_typing,
        })
    }

    pub fn update_presence(&self, status: PresenceStatus) -> bool {
        self.send(&ClientCommand::PresenceUpdate { status })
    }

    /// Subscribe to one kind of event.
    pub fn on(&self, kind: EventKind, handler: Handler) -> Subscription {
        self.inner.dispatcher.subscribe(kind, handler.clone());
        Subscription::new(kind, handler, &self.inner.dispatcher)
    }

    /// Convenience for closures.
    pub fn on_fn<F>(&self, kind: EventKind, f: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on(kind, Arc::new(f))
    }

    /// Remove the first registration of `handler` for `kind`.
    pub fn off(&self, kind: EventKind, handler: &Handler) -> bool {
        self.inner.dispatcher.unsubscribe(kind, handler)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.dispatcher.subscriber_count(kind)
    }

    pub fn state(&self) -> ConnectionSnapshot {
        let state = self.inner.lock_state();
        let ready_state = match (&state.sink, &state.pending_connect) {
            (Some(sink), _) => sink.ready_state(),
            (None, Some(_)) => ReadyState::Connecting,
            (None, None) => ReadyState::Closed,
        };
        ConnectionSnapshot {
            connected: state.connected,
            reconnect_attempts: state.policy.attempts(),
            ready_state,
            policy: state.policy.state(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connected
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: Event) {
        self.dispatcher.publish(&event);
    }

    /// Spawn an open under the current generation and record it as the
    /// in-flight attempt.
    fn start_attempt(
        this: &Arc<Self>,
        state: &mut State,
        credentials: Credentials,
    ) -> PendingConnect {
        let generation = state.generation;
        let task = tokio::spawn(Self::open_session(this.clone(), credentials, generation));
        let pending = async move {
            task.await.unwrap_or_else(|e| {
                Err(ConnectError::Transport(format!("connect task failed: {}", e)))
            })
        }
        .boxed()
        .shared();
        state.pending_connect = Some(pending.clone());
        pending
    }

    async fn open_session(
        self: Arc<Self>,
        credentials: Credentials,
        generation: u64,
    ) -> Result<(), ConnectError> {
        let result = match endpoint_url(&self.config.ws_url, &credentials) {
            Ok(url) => {
                crate::log_info!("Connecting to {}", redacted(&url));
                self.transport.open(&url).await
            }
            Err(e) => Err(e),
        };

        let mut state = self.lock_state();
        if state.generation != generation {
            // Superseded by disconnect or a newer connect
            if let Ok(link) = result {
                link.sink.close(CLOSE_NORMAL, "Superseded");
            }
            return Err(ConnectError::Cancelled);
        }
        state.pending_connect = None;

        match result {
            Ok(link) => {
                state.generation += 1;
                let session_generation = state.generation;
                state.sink = Some(link.sink.clone());
                state.connected = true;
                state.policy.on_open();
                drop(state);

                crate::log_info!("WebSocket connected");
                self.emit(Event::Connected);

                // Frames arriving meanwhile wait in the link's queue
                let mut state = self.lock_state();
                if state.generation == session_generation {
                    let session =
                        self.clone()
                            .run_session(session_generation, link.sink, link.events);
                    state.session.spawn(session);
                }
                Ok(())
            }
            Err(e) => {
                drop(state);
                crate::log_error!("WebSocket connect failed: {}", e);
                self.emit(Event::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Drive one open connection: dispatch frames in arrival order and run
    /// the heartbeat until the transport closes or goes stale.
    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        sink: Arc<dyn FrameSink>,
        mut events: UnboundedReceiver<TransportEvent>,
    ) {
        let mut monitor = HeartbeatMonitor::new(self.config.heartbeat.clone(), Instant::now());
        let mut ticker = monitor.ticker();

        let close = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Frame(text)) => {
                        if !self.deliver_frame(generation, &text, &mut monitor) {
                            return;
                        }
                    }
                    Some(TransportEvent::Error(message)) => {
                        crate::log_error!("WebSocket error: {}", message);
                        self.emit(Event::Error { message });
                    }
                    Some(TransportEvent::Closed(frame)) => break frame,
                    None => break CloseFrame::abnormal("transport dropped"),
                },
                _ = ticker.tick() => {
                    if self.lock_state().generation != generation {
                        return;
                    }
                    let now = Instant::now();
                    if monitor.is_stale(now) {
                        crate::log_warn!(
                            "No heartbeat received for {:?}, connection may be stale",
                            monitor.silence(now)
                        );
                        sink.close(CLOSE_STALE, "Heartbeat timeout");
                        break CloseFrame::new(CLOSE_STALE, "Heartbeat timeout");
                    }
                    let sent = encode(&ClientCommand::heartbeat_now())
                        .map(|frame| sink.send(frame))
                        .unwrap_or(false);
                    if !sent {
                        crate::log_debug!("Heartbeat not sent");
                    }
                }
            }
        };

        self.on_session_closed(generation, close);
    }

    /// Decode and publish one frame. Returns false once the session has been
    /// superseded and must stop reading.
    fn deliver_frame(&self, generation: u64, text: &str, monitor: &mut HeartbeatMonitor) -> bool {
        let event = match chatwire_shared::decode(text) {
            Ok(ServerEvent::Heartbeat(_)) => {
                monitor.record(Instant::now());
                return true;
            }
            Ok(server_event) => match Event::from_server(server_event) {
                Some(event) => event,
                None => return true,
            },
            Err(e) if e.is_forward_compatible() => {
                crate::log_warn!("Unknown message type: {}", e);
                return true;
            }
            Err(e) => {
                crate::log_error!("Error parsing WebSocket message: {}", e);
                return true;
            }
        };

        let _gate = self
            .dispatch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.lock_state().generation != generation {
            return false;
        }
        self.dispatcher.publish(&event);
        true
    }

    fn on_session_closed(self: &Arc<Self>, generation: u64, close: CloseFrame) {
        let follow_up = {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            state.connected = false;
            state.sink = None;
            state.session.release();

            if close.is_normal() {
                state.policy.reset();
                None
            } else {
                Some(self.schedule_reconnect(&mut state, generation))
            }
        };

        crate::log_info!("WebSocket disconnected: {} {}", close.code, close.reason);
        self.emit(Event::Disconnected {
            code: close.code,
            reason: close.reason,
        });
        if let Some(event) = follow_up {
            self.emit(event);
        }
    }

    /// Ask the policy what to do after an abnormal closure and arm the
    /// reconnect timer if it says retry. Returns the event to publish.
    fn schedule_reconnect(self: &Arc<Self>, state: &mut State, generation: u64) -> Event {
        match state.policy.on_abnormal_close() {
            ReconnectDecision::Retry { attempt, delay } => {
                crate::log_info!(
                    "Attempting to reconnect in {}ms (attempt {})",
                    delay.as_millis(),
                    attempt
                );
                let this = self.clone();
                state.reconnect_timer.schedule(delay, move || {
                    tokio::spawn(this.reopen(generation));
                });
                Event::Reconnecting { attempt, delay }
            }
            ReconnectDecision::Exhausted { attempts } => {
                crate::log_error!("Max reconnection attempts reached ({})", attempts);
                state.reconnect_timer.cancel();
                state.credentials = None;
                Event::MaxReconnectAttemptsReached { attempts }
            }
        }
    }

    /// Reconnect timer fired: reopen with the last credentials. A failed
    /// reopen counts as another abnormal closure.
    async fn reopen(self: Arc<Self>, generation: u64) {
        let attempt = {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            let Some(credentials) = state.credentials.clone() else {
                return;
            };
            match &state.pending_connect {
                Some(pending) => pending.clone(),
                None => Self::start_attempt(&self, &mut state, credentials),
            }
        };

        match attempt.await {
            Ok(()) | Err(ConnectError::Cancelled) => {}
            Err(_) => {
                let event = {
                    let mut state = self.lock_state();
                    if state.generation != generation {
                        return;
                    }
                    self.schedule_reconnect(&mut state, generation)
                };
                self.emit(event);
            }
        }
    }
}
