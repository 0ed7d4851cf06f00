//! Peer connection orchestrator
//!
//! Owns the single `RTCPeerConnection` of a call and drives its
//! offer/answer/candidate exchange from signaling messages. Local
//! candidates are trickled out as `ice` frames; remote tracks are grouped
//! into `RemoteStream`s and surfaced once per stream.

use super::remote::RemoteStream;
use super::state::{next_action, NegotiationAction, NegotiationEvent, NegotiationState};
use crate::config::VideoConfig;
use crate::media::LocalMediaStream;
use crate::signaling::{SignalingMessage, SignalingSink};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("WebRTC setup failed: {0}")]
    Setup(String),

    #[error("Negotiation failed during {step}: {reason}")]
    Failed { step: &'static str, reason: String },

    #[error("Negotiation timed out during {step} after {after:?}")]
    TimedOut { step: &'static str, after: Duration },
}

// ============================================================================
// EVENTS
// ============================================================================

/// Callback invoked once per distinct remote stream
pub type RemoteStreamCallback = Arc<dyn Fn(RemoteStream) + Send + Sync>;

/// Events published by a connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChanged(NegotiationState),
    RemoteStream(RemoteStream),
    PeerLeft,
    NegotiationFailed(String),
    SignalingClosed,
}

// ============================================================================
// PEER ORCHESTRATOR
// ============================================================================

pub struct PeerOrchestrator {
    pc: RwLock<Arc<RTCPeerConnection>>,
    ice_servers: Vec<RTCIceServer>,
    local_tracks: Vec<Arc<TrackLocalStaticSample>>,
    on_remote_stream: Option<RemoteStreamCallback>,
    signaling: Arc<dyn SignalingSink>,
    state: Arc<Mutex<NegotiationState>>,
    /// Remote candidates received before the remote description
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    negotiation_timeout: Duration,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl PeerOrchestrator {
    /// Creates the peer connection, registers its handlers and attaches
    /// every live track of `local_stream`.
    pub async fn new(
        config: &VideoConfig,
        signaling: Arc<dyn SignalingSink>,
        local_stream: Option<&LocalMediaStream>,
        on_remote_stream: Option<RemoteStreamCallback>,
    ) -> Result<Self, NegotiationError> {
        let (event_tx, _) = broadcast::channel(100);

        let pc = create_peer_connection(&config.ice_servers).await?;
        let local_tracks: Vec<Arc<TrackLocalStaticSample>> = local_stream
            .map(|stream| stream.live_tracks().map(|t| t.rtc_track()).collect())
            .unwrap_or_default();

        let orchestrator = Self {
            pc: RwLock::new(Arc::clone(&pc)),
            ice_servers: config.ice_servers.clone(),
            local_tracks,
            on_remote_stream,
            signaling,
            state: Arc::new(Mutex::new(NegotiationState::Idle)),
            pending_candidates: Mutex::new(Vec::new()),
            negotiation_timeout: config.negotiation_timeout,
            event_tx,
        };

        orchestrator.register_handlers(&pc);
        if let Err(e) = orchestrator.attach_tracks(&pc).await {
            orchestrator.close().await;
            return Err(e);
        }
        if let Some(stream) = local_stream {
            for track in stream.live_tracks() {
                track.start_sending();
            }
        }

        Ok(orchestrator)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    /// State of the underlying transport
    pub fn peer_connection_state(&self) -> RTCPeerConnectionState {
        self.pc().connection_state()
    }

    fn pc(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc.read())
    }

    pub(crate) fn publish(&self, event: ConnectionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Applies one inbound signaling message.
    ///
    /// Errors are negotiation failures; they leave the state unchanged and
    /// are never retried here.
    pub async fn handle(&self, message: SignalingMessage) -> Result<(), NegotiationError> {
        let current = self.state();
        let action = next_action(current, NegotiationEvent::from(&message));

        match (action, message) {
            (NegotiationAction::SendOffer, _) => self.send_offer().await?,
            (NegotiationAction::SendAnswer, SignalingMessage::Offer { sdp }) => {
                if current == NegotiationState::OfferSent {
                    self.discard_local_offer().await?;
                }
                self.send_answer(sdp).await?
            }
            (NegotiationAction::ApplyAnswer, SignalingMessage::Answer { sdp }) => {
                self.apply_answer(sdp).await?
            }
            (NegotiationAction::ApplyCandidate, SignalingMessage::Ice { candidate }) => {
                self.apply_candidate(candidate).await
            }
            (NegotiationAction::NotifyPeerLeft, _) => {
                tracing::info!("Remote participant left the room");
                self.publish(ConnectionEvent::PeerLeft);
            }
            (_, message) => {
                tracing::debug!("Ignoring {} frame in state {}", message.kind(), current);
            }
        }

        self.commit(action.next_state(current));
        Ok(())
    }

    /// Closes the peer connection. Safe in any state; later calls are no-ops.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == NegotiationState::Closed {
                return;
            }
            *state = NegotiationState::Closed;
        }
        self.pending_candidates.lock().clear();
        self.publish(ConnectionEvent::StateChanged(NegotiationState::Closed));

        if let Err(e) = self.pc().close().await {
            tracing::debug!("Peer connection close reported: {}", e);
        }
        tracing::info!("Peer connection closed");
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    async fn send_offer(&self) -> Result<(), NegotiationError> {
        let pc = self.pc();
        let offer = self.step("create_offer", pc.create_offer(None)).await?;
        self.step("set_local_description", pc.set_local_description(offer.clone()))
            .await?;

        let sdp = pc.local_description().await.unwrap_or(offer);
        if !self.signaling.send(&SignalingMessage::Offer { sdp }) {
            tracing::warn!("Offer created but signaling channel is not open");
        }
        tracing::info!("Sent offer");
        Ok(())
    }

    /// Drops our unanswered offer so the remote one can be answered.
    ///
    /// webrtc-rs cannot roll back a local offer, so the peer connection is
    /// replaced by a fresh one carrying the same tracks and handlers.
    async fn discard_local_offer(&self) -> Result<(), NegotiationError> {
        let fresh = create_peer_connection(&self.ice_servers).await?;
        self.register_handlers(&fresh);
        if let Err(e) = self.attach_tracks(&fresh).await {
            let _ = fresh.close().await;
            return Err(e);
        }

        let stale = std::mem::replace(&mut *self.pc.write(), fresh);
        stale.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        if let Err(e) = stale.close().await {
            tracing::debug!("Discarded peer connection close reported: {}", e);
        }
        tracing::info!("Offer collision; discarded local offer");
        Ok(())
    }

    async fn send_answer(&self, offer: RTCSessionDescription) -> Result<(), NegotiationError> {
        let pc = self.pc();
        self.step("set_remote_description", pc.set_remote_description(offer))
            .await?;
        self.flush_pending_candidates(&pc).await;
        let answer = self.step("create_answer", pc.create_answer(None)).await?;
        self.step("set_local_description", pc.set_local_description(answer.clone()))
            .await?;

        let sdp = pc.local_description().await.unwrap_or(answer);
        if !self.signaling.send(&SignalingMessage::Answer { sdp }) {
            tracing::warn!("Answer created but signaling channel is not open");
        }
        tracing::info!("Sent answer");
        Ok(())
    }

    async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), NegotiationError> {
        let pc = self.pc();
        self.step("set_remote_description", pc.set_remote_description(answer))
            .await?;
        self.flush_pending_candidates(&pc).await;
        tracing::info!("Applied remote answer");
        Ok(())
    }

    /// Candidates that arrive before the remote description are held
    /// until it is set.
    async fn apply_candidate(&self, candidate: RTCIceCandidateInit) {
        let pc = self.pc();
        if pc.remote_description().await.is_none() {
            tracing::debug!("Holding ICE candidate until the remote description is set");
            self.pending_candidates.lock().push(candidate);
            return;
        }
        if let Err(e) = pc.add_ice_candidate(candidate).await {
            tracing::debug!("Ignoring ICE candidate: {}", e);
        }
    }

    async fn flush_pending_candidates(&self, pc: &RTCPeerConnection) {
        let pending = std::mem::take(&mut *self.pending_candidates.lock());
        for candidate in pending {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                tracing::debug!("Ignoring held ICE candidate: {}", e);
            }
        }
    }

    /// Bounds one description step by the negotiation timeout
    async fn step<T, F>(&self, step: &'static str, fut: F) -> Result<T, NegotiationError>
    where
        F: Future<Output = Result<T, webrtc::Error>>,
    {
        match tokio::time::timeout(self.negotiation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(NegotiationError::Failed {
                step,
                reason: e.to_string(),
            }),
            Err(_) => Err(NegotiationError::TimedOut {
                step,
                after: self.negotiation_timeout,
            }),
        }
    }

    /// Stores `next` unless the connection was closed meanwhile
    fn commit(&self, next: NegotiationState) {
        let changed = {
            let mut state = self.state.lock();
            if *state == NegotiationState::Closed || *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            tracing::info!("Negotiation state: {}", next);
            self.publish(ConnectionEvent::StateChanged(next));
        }
    }

    // ========================================================================
    // SETUP
    // ========================================================================

    async fn attach_tracks(&self, pc: &RTCPeerConnection) -> Result<(), NegotiationError> {
        for track in &self.local_tracks {
            pc.add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| NegotiationError::Failed {
                    step: "add_track",
                    reason: e.to_string(),
                })?;
            tracing::debug!("Attached local track {}", track.id());
        }
        Ok(())
    }

    fn register_handlers(&self, pc: &RTCPeerConnection) {
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                tracing::info!("Peer connection state: {:?}", s);
                Box::pin(async {})
            }));

        let signaling = Arc::clone(&self.signaling);
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        if signaling.is_open() {
                            signaling.send(&SignalingMessage::Ice { candidate: init });
                        }
                    }
                    Err(e) => tracing::warn!("Failed to serialise local candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let streams: Arc<Mutex<HashMap<String, RemoteStream>>> = Arc::default();
        let event_tx = self.event_tx.clone();
        let on_remote_stream = self.on_remote_stream.clone();
        pc.on_track(Box::new(move |track, _, _| {
            let stream_id = track.stream_id();
            let surfaced = {
                let mut streams = streams.lock();
                match streams.get(&stream_id) {
                    Some(stream) => {
                        stream.add_track(Arc::clone(&track));
                        None
                    }
                    None => {
                        let stream = RemoteStream::new(stream_id.clone());
                        stream.add_track(Arc::clone(&track));
                        streams.insert(stream_id.clone(), stream.clone());
                        Some(stream)
                    }
                }
            };

            tracing::info!("Received remote {} track on stream {}", track.kind(), stream_id);

            if let Some(stream) = surfaced {
                if let Some(callback) = &on_remote_stream {
                    callback(stream.clone());
                }
                let _ = event_tx.send(ConnectionEvent::RemoteStream(stream));
            }
            Box::pin(async {})
        }));
    }
}

/// Builds a peer connection with default codecs and interceptors
async fn create_peer_connection(
    ice_servers: &[RTCIceServer],
) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| NegotiationError::Setup(e.to_string()))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| NegotiationError::Setup(e.to_string()))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: ice_servers.to_vec(),
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(rtc_config)
        .await
        .map_err(|e| NegotiationError::Setup(e.to_string()))?;

    Ok(Arc::new(pc))
}

impl std::fmt::Debug for PeerOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerOrchestrator")
            .field("state", &self.state())
            .field("peer_connection", &self.peer_connection_state())
            .finish()
    }
}
