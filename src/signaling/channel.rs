//! WebSocket channel to the signaling relay
//!
//! One channel per participant and room:
//! - Reader task decodes frames and forwards them in arrival order
//! - Writer task serialises outbound frames
//! - Sends while not open are dropped, never queued
//! - No reconnection and no heartbeat

use super::messages::SignalingMessage;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out connecting to signaling server after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// CHANNEL STATE / EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// What the reader task hands to the consumer
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// A decoded frame from the relay
    Message(SignalingMessage),

    /// The socket is gone (remote close, transport error or local close)
    Closed,
}

// ============================================================================
// SIGNALING SINK
// ============================================================================

/// Outbound half of a signaling channel, as seen by the peer orchestrator
pub trait SignalingSink: Send + Sync {
    fn is_open(&self) -> bool;

    /// Sends `message` if the channel is open. Returns `false` when the
    /// frame was dropped.
    fn send(&self, message: &SignalingMessage) -> bool;
}

// ============================================================================
// SIGNALING CHANNEL
// ============================================================================

pub struct SignalingChannel {
    /// Endpoint without the token query, for logs
    endpoint: String,
    state: Arc<RwLock<ChannelState>>,
    close_requested: AtomicBool,
    tx: mpsc::UnboundedSender<Message>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Connects to `url` and starts the reader and writer tasks.
    ///
    /// Returns the channel and the stream of inbound events.
    pub async fn open(
        url: &Url,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalingEvent>), SignalingError> {
        let endpoint = format!(
            "{}://{}{}",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.path()
        );
        tracing::info!("Connecting to signaling relay: {}", endpoint);

        let state = Arc::new(RwLock::new(ChannelState::Connecting));

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| SignalingError::Timeout(connect_timeout))?
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<SignalingEvent>();

        *state.write() = ChannelState::Open;
        tracing::info!("Signaling channel open: {}", endpoint);

        let reader_state = Arc::clone(&state);
        let reader_endpoint = endpoint.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match SignalingMessage::decode(&text) {
                        Ok(message) => {
                            tracing::debug!("Received {} frame", message.kind());
                            if event_tx.send(SignalingEvent::Message(message)).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!("Dropping frame: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!("Signaling relay closed the socket: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Signaling socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            *reader_state.write() = ChannelState::Closed;
            tracing::info!("Signaling channel closed: {}", reader_endpoint);
            let _ = event_tx.send(SignalingEvent::Closed);
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::debug!("Failed to write signaling frame: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let channel = Self {
            endpoint,
            state,
            close_requested: AtomicBool::new(false),
            tx,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        };

        Ok((channel, event_rx))
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Closes the socket. Never fails; later calls are no-ops.
    pub async fn close(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.write();
            if *state != ChannelState::Closed {
                *state = ChannelState::Closing;
            }
        }

        let _ = self.tx.send(Message::Close(None));

        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
                tracing::debug!("Close frame not flushed in time: {}", self.endpoint);
                writer.abort();
            }
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        *self.state.write() = ChannelState::Closed;
        tracing::info!("Signaling channel closed locally: {}", self.endpoint);
    }
}

impl SignalingSink for SignalingChannel {
    fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    fn send(&self, message: &SignalingMessage) -> bool {
        if !self.is_open() {
            tracing::debug!("Channel not open, dropping {} frame", message.kind());
            return false;
        }

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {} frame: {}", message.kind(), e);
                return false;
            }
        };

        self.tx.send(Message::Text(text)).is_ok()
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.lock().take() {
            writer.abort();
        }
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
