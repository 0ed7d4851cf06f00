//! Call screen controller
//!
//! Holds everything the call screen shows: the local preview, the single
//! connection, the remote stream slot and one human readable error.
//! Every operation records its failure in `error()` and also returns it,
//! so a UI can either poll or react to the result. Retrying is calling
//! the same operation again.

use crate::call_engine::{
    connect_to_room, ConnectOptions, Connection, ConnectionEvent, NegotiationState, RemoteStream,
};
use crate::config::VideoConfig;
use crate::media::{
    acquire_local_media, release_media, LocalMediaStream, MediaConstraints, MediaDevices,
    TrackKind,
};
use crate::session::Session;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const CAMERA_ERROR: &str = "Could not access camera/microphone";
pub const SIGN_IN_ERROR: &str = "Sign in to join the call";
pub const ROOM_CODE_ERROR: &str = "Invalid room code";
pub const DISCONNECTED_ERROR: &str = "Connection to the call was lost";

pub struct CallPage {
    config: VideoConfig,
    session: Option<Arc<Session>>,
    code: Option<String>,
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    local_stream: RwLock<Option<Arc<LocalMediaStream>>>,
    connection: Mutex<Option<Connection>>,
    remote_stream: Arc<RwLock<Option<RemoteStream>>>,
    error: Arc<RwLock<Option<String>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl CallPage {
    pub fn new(
        config: VideoConfig,
        session: Option<Arc<Session>>,
        code: Option<String>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        Self {
            config,
            session,
            code,
            devices,
            constraints: MediaConstraints::default(),
            local_stream: RwLock::new(None),
            connection: Mutex::new(None),
            remote_stream: Arc::new(RwLock::new(None)),
            error: Arc::new(RwLock::new(None)),
            watcher: Mutex::new(None),
        }
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn error(&self) -> Option<String> {
        self.error.read().clone()
    }

    pub fn local_stream(&self) -> Option<Arc<LocalMediaStream>> {
        self.local_stream.read().clone()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.remote_stream.read().clone()
    }

    /// `true` while the connection is usable. A connection whose relay
    /// socket dropped does not count; `join` replaces it.
    pub fn is_joined(&self) -> bool {
        self.connection.lock().as_ref().is_some_and(Connection::is_live)
    }

    pub fn negotiation_state(&self) -> Option<NegotiationState> {
        self.connection.lock().as_ref().map(|c| c.state())
    }

    fn fail(&self, message: impl Into<String>) -> String {
        let message = message.into();
        *self.error.write() = Some(message.clone());
        message
    }

    // ========================================================================
    // CAMERA
    // ========================================================================

    /// Starts the local preview. Reuses the running stream if there is one.
    pub fn start_camera(&self) -> Result<Arc<LocalMediaStream>, String> {
        if let Some(stream) = self.local_stream() {
            if stream.is_live() {
                return Ok(stream);
            }
        }

        match acquire_local_media(self.devices.as_ref(), self.constraints) {
            Ok(stream) => {
                *self.local_stream.write() = Some(Arc::clone(&stream));
                *self.error.write() = None;
                Ok(stream)
            }
            Err(e) => {
                tracing::error!("Camera start failed: {}", e);
                Err(self.fail(CAMERA_ERROR))
            }
        }
    }

    pub fn stop_camera(&self) {
        let stream = self.local_stream.write().take();
        release_media(stream.as_deref());
    }

    /// Mutes or unmutes the local microphone. The track keeps sending.
    pub fn set_microphone_muted(&self, muted: bool) {
        if let Some(stream) = self.local_stream() {
            for track in stream.live_tracks() {
                if track.kind() == TrackKind::Audio {
                    track.set_muted(muted);
                }
            }
        }
    }

    // ========================================================================
    // CALL
    // ========================================================================

    /// Joins the room with the current local stream, if any.
    pub async fn join(&self) -> Result<(), String> {
        let session = match &self.session {
            Some(session) if !session.is_expired(Utc::now()) => Arc::clone(session),
            _ => return Err(self.fail(SIGN_IN_ERROR)),
        };

        let code = match self.code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => return Err(self.fail(ROOM_CODE_ERROR)),
        };

        if self.is_joined() {
            tracing::debug!("Already joined {}", code);
            return Ok(());
        }
        self.leave().await;

        let slot = Arc::clone(&self.remote_stream);
        let mut options = ConnectOptions::new(session.token(), code.clone())
            .on_remote_stream(move |stream| {
                *slot.write() = Some(stream);
            });
        if let Some(stream) = self.local_stream() {
            options = options.with_local_stream(stream);
        }

        let connection = connect_to_room(&self.config, options)
            .await
            .map_err(|e| {
                tracing::error!("Joining {} failed: {}", code, e);
                self.fail(e.to_string())
            })?;

        let watcher = tokio::spawn(watch_connection(
            connection.subscribe(),
            Arc::clone(&self.error),
            Arc::clone(&self.remote_stream),
        ));

        let previous = self.connection.lock().replace(connection);
        if let Some(previous) = previous {
            previous.close().await;
        }
        if let Some(previous) = self.watcher.lock().replace(watcher) {
            previous.abort();
        }
        *self.error.write() = None;
        Ok(())
    }

    /// Leaves the room. The local preview keeps running.
    pub async fn leave(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        *self.remote_stream.write() = None;
    }

    /// Leaves the room and releases the camera.
    pub async fn teardown(&self) {
        self.leave().await;
        self.stop_camera();
    }
}

/// Mirrors connection events into the page's error and remote stream slots
async fn watch_connection(
    mut events: broadcast::Receiver<ConnectionEvent>,
    error: Arc<RwLock<Option<String>>>,
    remote_stream: Arc<RwLock<Option<RemoteStream>>>,
) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::NegotiationFailed(reason)) => {
                *error.write() = Some(reason);
            }
            Ok(ConnectionEvent::SignalingClosed) => {
                *error.write() = Some(DISCONNECTED_ERROR.to_string());
                *remote_stream.write() = None;
                break;
            }
            Ok(ConnectionEvent::PeerLeft) => {
                *remote_stream.write() = None;
            }
            Ok(ConnectionEvent::StateChanged(NegotiationState::Closed)) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Call page missed {} connection events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

impl std::fmt::Debug for CallPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPage")
            .field("code", &self.code)
            .field("signed_in", &self.session.is_some())
            .field("joined", &self.is_joined())
            .field("error", &self.error())
            .finish()
    }
}
