//! Transport handle and WebSocket connector
//!
//! Owns one underlying connection at a time: a write task draining an
//! outbound frame channel into the socket, and a read task decoding
//! inbound text frames into `TransportEvent`s. The session actor consumes
//! events from the handle; replacing a handle (reconnect) drops its event
//! receiver, so a torn-down instance can never leak stale events into a
//! successor.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

use crate::error::{SendError, SessionError};
use crate::message::{ClientFrame, ServerFrame};

/// Buffer size for the outbound frame channel
const OUTBOUND_BUFFER_SIZE: usize = 32;

/// Buffer size for the inbound event channel
const EVENT_BUFFER_SIZE: usize = 32;

/// Inbound events delivered by a transport handle
///
/// `Ready` is emitted once when the connection is usable; `Closed` is
/// emitted exactly once when it stops being usable, whatever the cause.
#[derive(Debug)]
pub enum TransportEvent {
    Ready,
    Closed,
    Frame(ServerFrame),
}

/// One live connection
///
/// At most one handle exists per session; the session tears the old one
/// down before constructing a replacement.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::Sender<ClientFrame>,
    events: mpsc::Receiver<TransportEvent>,
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
    torn_down: bool,
}

impl TransportHandle {
    /// Assemble a handle from channel halves (used by connectors and tests)
    pub fn new(
        outbound: mpsc::Sender<ClientFrame>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            outbound,
            events,
            read_task: None,
            write_task: None,
            torn_down: false,
        }
    }

    fn with_tasks(mut self, read_task: JoinHandle<()>, write_task: JoinHandle<()>) -> Self {
        self.read_task = Some(read_task);
        self.write_task = Some(write_task);
        self
    }

    /// Queue a frame for sending
    ///
    /// Fails when the handle is torn down or the outbound buffer is
    /// full. The session drops chat and typing frames on failure
    /// (fire-and-forget) but fails a pending room handshake, so a
    /// create/join never waits on a frame that was never queued.
    pub fn send(&self, frame: ClientFrame) -> Result<(), SendError> {
        if self.torn_down {
            return Err(SendError::ChannelClosed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::ChannelFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Receive the next inbound event
    ///
    /// Returns `None` once the handle is torn down or the read task has
    /// ended and the buffer is drained.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.torn_down {
            return None;
        }
        self.events.recv().await
    }

    /// Release the underlying connection (idempotent)
    ///
    /// Safe to call at any point, including before the connection ever
    /// became ready. After teardown the handle delivers no further events.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.events.close();
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        if let Some(task) = self.write_task.take() {
            task.abort();
        }
        debug!("Transport handle torn down");
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Factory for transport handles
///
/// The seam between the session and the wire: production code uses
/// `WsConnector`, tests plug in channel-backed handles.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<TransportHandle, SessionError>> + Send;
}

/// WebSocket connector using tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<TransportHandle, SessionError> {
        debug!("Connecting to {}", self.url);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientFrame>(OUTBOUND_BUFFER_SIZE);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(EVENT_BUFFER_SIZE);

        // Read task: socket -> TransportEvent. The handshake completed, so
        // the connection is usable before the first frame arrives.
        let read_task = tokio::spawn(async move {
            if event_tx.send(TransportEvent::Ready).await.is_err() {
                return;
            }
            while let Some(msg_result) = ws_receiver.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => {
                                if event_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                    debug!("Session gone, ending read task");
                                    return;
                                }
                            }
                            Err(e) => {
                                // Unknown frame kinds are a no-op, never fatal
                                debug!("Ignoring undecodable frame: {}", e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Server sent close frame");
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        // Pong is handled automatically by tungstenite
                    }
                    Ok(_) => {
                        // Binary or other message types - ignore
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            // Exactly one Closed per connection lifetime
            let _ = event_tx.send(TransportEvent::Closed).await;
            debug!("Read task ended");
        });

        // Write task: ClientFrame -> socket
        let write_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            debug!("WebSocket send failed, ending write task");
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to serialize frame: {}", e);
                        // Continue - don't break on serialization errors
                    }
                }
            }
            let _ = ws_sender.close().await;
            debug!("Write task ended");
        });

        Ok(TransportHandle::new(outbound_tx, event_rx).with_tasks(read_task, write_task))
    }
}
