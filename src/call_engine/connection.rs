//! Room connection
//!
//! Ties one signaling channel to one peer orchestrator and pumps relay
//! frames into it, one at a time, in arrival order.

use super::orchestrator::{
    ConnectionEvent, NegotiationError, PeerOrchestrator, RemoteStreamCallback,
};
use super::remote::RemoteStream;
use super::state::NegotiationState;
use crate::config::{ConfigError, VideoConfig};
use crate::media::LocalMediaStream;
use crate::signaling::{
    ChannelState, SignalingChannel, SignalingError, SignalingEvent, SignalingSink,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Invalid room code")]
    InvalidRoomCode,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

/// What to join and with which media
#[derive(Clone)]
pub struct ConnectOptions {
    pub token: String,
    pub code: String,
    pub local_stream: Option<Arc<LocalMediaStream>>,
    pub on_remote_stream: Option<RemoteStreamCallback>,
}

impl ConnectOptions {
    pub fn new(token: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            code: code.into(),
            local_stream: None,
            on_remote_stream: None,
        }
    }

    pub fn with_local_stream(mut self, stream: Arc<LocalMediaStream>) -> Self {
        self.local_stream = Some(stream);
        self
    }

    pub fn on_remote_stream<F>(mut self, callback: F) -> Self
    where
        F: Fn(RemoteStream) + Send + Sync + 'static,
    {
        self.on_remote_stream = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("code", &self.code)
            .field("token", &"[redacted]")
            .field("local_stream", &self.local_stream.as_ref().map(|s| s.id().to_string()))
            .field("on_remote_stream", &self.on_remote_stream.is_some())
            .finish()
    }
}

/// Joins room `options.code`.
///
/// Opens the signaling channel, builds the peer connection with the
/// configured ICE servers and attaches the local tracks. The peer that is
/// already in the room sends the offer once the relay announces us.
pub async fn connect_to_room(
    config: &VideoConfig,
    options: ConnectOptions,
) -> Result<Connection, CallError> {
    let code = options.code.trim().to_string();
    if code.is_empty() {
        return Err(CallError::InvalidRoomCode);
    }

    let url = config.signaling_url(&code, &options.token)?;
    let (channel, events) = SignalingChannel::open(&url, config.connect_timeout).await?;
    let channel = Arc::new(channel);

    let orchestrator = match PeerOrchestrator::new(
        config,
        Arc::clone(&channel) as Arc<dyn SignalingSink>,
        options.local_stream.as_deref(),
        options.on_remote_stream,
    )
    .await
    {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            tracing::error!("Failed to set up peer connection: {}", e);
            channel.close().await;
            return Err(e.into());
        }
    };

    let dispatch = tokio::spawn(dispatch(Arc::clone(&orchestrator), events));

    tracing::info!("Joined room {}", code);

    Ok(Connection {
        code,
        channel,
        orchestrator,
        dispatch: Mutex::new(Some(dispatch)),
        closed: Arc::new(AtomicBool::new(false)),
    })
}

async fn dispatch(
    orchestrator: Arc<PeerOrchestrator>,
    mut events: mpsc::UnboundedReceiver<SignalingEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SignalingEvent::Message(message) => {
                let kind = message.kind();
                if let Err(e) = orchestrator.handle(message).await {
                    tracing::warn!("Negotiation failed on {} frame: {}", kind, e);
                    orchestrator.publish(ConnectionEvent::NegotiationFailed(e.to_string()));
                }
            }
            SignalingEvent::Closed => {
                tracing::warn!("Signaling closed; rejoin required");
                orchestrator.publish(ConnectionEvent::SignalingClosed);
                break;
            }
        }
    }
}

// ============================================================================
// CONNECTION
// ============================================================================

/// A joined room. Exclusively owns its channel and peer connection.
pub struct Connection {
    code: String,
    channel: Arc<SignalingChannel>,
    orchestrator: Arc<PeerOrchestrator>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn state(&self) -> NegotiationState {
        self.orchestrator.state()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `false` once the relay socket or the peer connection is gone; such a
    /// connection only needs closing.
    pub fn is_live(&self) -> bool {
        !self.is_closed()
            && self.channel_state() == ChannelState::Open
            && self.state() != NegotiationState::Closed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.orchestrator.subscribe()
    }

    /// Closes the peer connection and the signaling channel.
    ///
    /// Never fails; safe mid-negotiation and on an already closed connection.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dispatch = self.dispatch.lock().take();
        teardown(dispatch, &self.orchestrator, &self.channel).await;
        tracing::info!("Left room {}", self.code);
    }
}

async fn teardown(
    dispatch: Option<JoinHandle<()>>,
    orchestrator: &PeerOrchestrator,
    channel: &SignalingChannel,
) {
    if let Some(dispatch) = dispatch {
        dispatch.abort();
    }
    orchestrator.close().await;
    channel.close().await;
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dispatch = self.dispatch.lock().take();
        let orchestrator = Arc::clone(&self.orchestrator);
        let channel = Arc::clone(&self.channel);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Connection to {} dropped while open", self.code);
                handle.spawn(async move {
                    teardown(dispatch, &orchestrator, &channel).await;
                });
            }
            Err(_) => {
                if let Some(dispatch) = dispatch {
                    dispatch.abort();
                }
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("code", &self.code)
            .field("state", &self.state())
            .field("channel", &self.channel_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
