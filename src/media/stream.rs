//! Local media stream
//!
//! A stream groups the tracks acquired for one call page. The UI and the
//! peer connection only read it; `release_media` is the only way to stop it.

use super::devices::{CaptureDevice, MediaConstraints, MediaDevices, MediaError, TrackKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const OPUS_CLOCK_RATE: u32 = 48000;
const OPUS_CHANNELS: u16 = 2;
const VIDEO_CLOCK_RATE: u32 = 90000;

/// Poll interval while a device has no frame ready
const IDLE_POLL: Duration = Duration::from_millis(5);

type SharedDevice = Arc<Mutex<Option<Box<dyn CaptureDevice>>>>;

// ============================================================================
// MEDIA TRACK
// ============================================================================

/// One captured track and the outbound WebRTC track it feeds
pub struct MediaTrack {
    kind: TrackKind,
    label: String,
    rtc_track: Arc<TrackLocalStaticSample>,
    device: SharedDevice,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl MediaTrack {
    fn new(kind: TrackKind, stream_id: &str, device: Box<dyn CaptureDevice>) -> Self {
        let codec = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            },
        };

        Self {
            kind,
            label: device.label(),
            rtc_track: Arc::new(TrackLocalStaticSample::new(
                codec,
                format!("{}-{}", kind, Uuid::new_v4()),
                stream_id.to_owned(),
            )),
            device: Arc::new(Mutex::new(Some(device))),
            sender: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Outbound track to attach to a peer connection
    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc_track)
    }

    pub fn is_live(&self) -> bool {
        self.device.lock().is_some()
    }

    /// `true` while frames are being written to `rtc_track()`
    pub fn is_sending(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|sender| !sender.is_finished())
    }

    pub fn set_muted(&self, muted: bool) {
        if let Some(device) = self.device.lock().as_mut() {
            device.set_muted(muted);
        }
    }

    /// Input level of the device, if it meters one
    pub fn level(&self) -> Option<f32> {
        self.device.lock().as_ref().and_then(|device| device.level())
    }

    /// Starts copying device frames into the outbound track. Must run
    /// inside a tokio runtime; later calls are no-ops while it runs.
    pub(crate) fn start_sending(&self) {
        let mut sender = self.sender.lock();
        if sender.as_ref().is_some_and(|s| !s.is_finished()) || !self.is_live() {
            return;
        }

        let device = Arc::clone(&self.device);
        let rtc_track = self.rtc_track();
        let kind = self.kind;

        *sender = Some(tokio::spawn(async move {
            tracing::debug!("Sending local {} frames", kind);
            loop {
                let frame = match device.lock().as_mut() {
                    Some(device) => device.read_frame(),
                    None => break,
                };
                let Some(frame) = frame else {
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                };

                let duration = frame.duration;
                let sample = Sample {
                    data: frame.data.into(),
                    duration,
                    ..Default::default()
                };
                if let Err(e) = rtc_track.write_sample(&sample).await {
                    tracing::debug!("Dropping {} frame: {}", kind, e);
                }
                tokio::time::sleep(duration).await;
            }
            tracing::debug!("Stopped sending local {} frames", kind);
        }));
    }

    /// Returns `true` if the track was live.
    fn stop(&self) -> bool {
        if let Some(sender) = self.sender.lock().take() {
            sender.abort();
        }
        match self.device.lock().take() {
            Some(mut device) => {
                device.stop();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("live", &self.is_live())
            .field("sending", &self.is_sending())
            .finish()
    }
}

// ============================================================================
// LOCAL MEDIA STREAM
// ============================================================================

#[derive(Debug)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl LocalMediaStream {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn live_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.is_live())
    }

    /// `true` while at least one track is still capturing
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }
}

// ============================================================================
// ACQUIRE / RELEASE
// ============================================================================

/// Opens the devices requested by `constraints`.
///
/// Fails on the first device that is denied or missing; devices opened
/// before it are stopped again. Callers show the error and must not retry
/// on their own.
pub fn acquire_local_media(
    devices: &dyn MediaDevices,
    constraints: MediaConstraints,
) -> Result<Arc<LocalMediaStream>, MediaError> {
    let kinds = constraints.kinds();
    if kinds.is_empty() {
        return Err(MediaError::NoTracksRequested);
    }

    let id = Uuid::new_v4().to_string();
    let mut tracks = Vec::with_capacity(kinds.len());

    for kind in kinds {
        match devices.open(kind) {
            Ok(device) => {
                tracing::info!("Opened {}: {}", kind.device_name(), device.label());
                tracks.push(MediaTrack::new(kind, &id, device));
            }
            Err(e) => {
                tracing::warn!("Could not open {}: {}", kind.device_name(), e);
                for track in &tracks {
                    track.stop();
                }
                return Err(e);
            }
        }
    }

    Ok(Arc::new(LocalMediaStream { id, tracks }))
}

/// Stops every track of `stream`. No-op for `None` or a stopped stream.
pub fn release_media(stream: Option<&LocalMediaStream>) {
    let Some(stream) = stream else {
        return;
    };

    let stopped = stream.tracks.iter().filter(|t| t.stop()).count();
    if stopped > 0 {
        tracing::info!("Released {} track(s) of stream {}", stopped, stream.id);
    }
}
