//! Native WebSocket transport using tokio-tungstenite.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatwire_shared::ConnectError;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{redacted, CloseFrame, FrameSink, ReadyState, Transport, TransportEvent, TransportLink};

/// Close code reported when the peer closed without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// How long a locally closed connection waits for the server's close reply.
pub const CLOSE_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens real WebSocket connections.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    close_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::with_close_timeout(CLOSE_REPLY_TIMEOUT)
    }

    /// Give up on the server's close reply after `close_timeout`.
    pub fn with_close_timeout(close_timeout: Duration) -> Self {
        Self { close_timeout }
    }
}

enum Outgoing {
    Text(String),
    Close(u16, String),
}

/// Write half handed to the connection manager.
struct WebSocketSink {
    sender: UnboundedSender<Outgoing>,
    state: Arc<AtomicU8>,
    close_requested: Arc<Notify>,
}

impl FrameSink for WebSocketSink {
    fn send(&self, frame: String) -> bool {
        if self.ready_state() != ReadyState::Open {
            crate::log_warn!("WebSocket not open, dropping frame");
            return false;
        }
        self.sender.unbounded_send(Outgoing::Text(frame)).is_ok()
    }

    fn close(&self, code: u16, reason: &str) {
        if matches!(self.ready_state(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.state.store(ReadyState::Closing as u8, Ordering::SeqCst);
        let _ = self
            .sender
            .unbounded_send(Outgoing::Close(code, reason.to_string()));
        self.close_requested.notify_one();
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink, ConnectError> {
        let endpoint = redacted(url);
        crate::log_info!("Opening WebSocket to {}", endpoint);

        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            crate::log_error!("WebSocket open to {} failed: {}", endpoint, e);
            ConnectError::Transport(e.to_string())
        })?;

        let state = Arc::new(AtomicU8::new(ReadyState::Open as u8));
        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = unbounded::<Outgoing>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Read task: forwards text frames in arrival order
        let state_for_read = state.clone();
        let close_requested = Arc::new(Notify::new());
        let close_signal = close_requested.clone();
        let close_timeout = self.close_timeout;
        tokio::spawn(async move {
            let close = loop {
                let next = tokio::select! {
                    next = read.next() => next,
                    _ = close_signal.notified() => {
                        break await_close_reply(&mut read, close_timeout).await;
                    }
                };
                match next {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(TransportEvent::Frame(text.as_str().to_owned())).is_err() {
                            // Owner is gone; nobody cares about the rest
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => break close_frame_of(frame),
                    Some(Ok(Message::Ping(data))) => {
                        // Pong is handled automatically by tungstenite
                        crate::log_debug!("Received ping: {:?}", data);
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, pong, etc.
                    }
                    Some(Err(e)) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        break CloseFrame::abnormal(e.to_string());
                    }
                    None => break CloseFrame::abnormal("stream ended"),
                }
            };
            state_for_read.store(ReadyState::Closed as u8, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::Closed(close));
        });

        // Write task: drains the outgoing queue until closed
        let state_for_write = state.clone();
        tokio::spawn(async move {
            while let Some(out) = out_rx.next().await {
                match out {
                    Outgoing::Text(json) => {
                        if let Err(e) = write.send(Message::text(json)).await {
                            crate::log_error!("Send failed: {}", e);
                            break;
                        }
                    }
                    Outgoing::Close(code, reason) => {
                        let frame = WsCloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            crate::log_debug!("Close frame not delivered: {}", e);
                        }
                        break;
                    }
                }
            }
            state_for_write.store(ReadyState::Closed as u8, Ordering::SeqCst);
        });

        Ok(TransportLink {
            sink: Arc::new(WebSocketSink {
                sender: out_tx,
                state,
                close_requested,
            }),
            events: event_rx,
        })
    }
}

fn close_frame_of(frame: Option<WsCloseFrame>) -> CloseFrame {
    match frame {
        Some(f) => CloseFrame::new(u16::from(f.code), f.reason.as_str()),
        None => CloseFrame::new(CLOSE_NO_STATUS, ""),
    }
}

/// After a local close, wait for the server's reply. Frames still in flight
/// are discarded. A server that never answers is cut off after `timeout`.
async fn await_close_reply<S>(read: &mut S, timeout: Duration) -> CloseFrame
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let reply = async {
        loop {
            match read.next().await {
                Some(Ok(Message::Close(frame))) => return close_frame_of(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => return CloseFrame::abnormal(e.to_string()),
                None => return CloseFrame::abnormal("stream ended"),
            }
        }
    };
    match tokio::time::timeout(timeout, reply).await {
        Ok(close) => close,
        Err(_) => {
            crate::log_warn!("No close reply within {:?}, dropping connection", timeout);
            CloseFrame::abnormal("close reply timed out")
        }
    }
}
