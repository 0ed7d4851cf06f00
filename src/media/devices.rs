//! Platform seam for capture devices

use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission to use the {} was denied", .0.device_name())]
    PermissionDenied(TrackKind),

    #[error("No usable {} available: {reason}", .kind.device_name())]
    DeviceUnavailable { kind: TrackKind, reason: String },

    #[error("Media constraints request neither audio nor video")]
    NoTracksRequested,
}

// ============================================================================
// TRACK KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Human name of the device backing this kind of track
    pub fn device_name(&self) -> &'static str {
        match self {
            Self::Audio => "microphone",
            Self::Video => "camera",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

// ============================================================================
// CONSTRAINTS
// ============================================================================

/// Which tracks to capture. Both are requested by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    /// Requested kinds in capture order (audio first)
    pub fn kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}

// ============================================================================
// DEVICE TRAITS
// ============================================================================

/// One encoded frame for the outbound track of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub data: Vec<u8>,
    pub duration: Duration,
}

/// Opus packet that decodes to 20 ms of silence
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

impl MediaFrame {
    pub fn new(data: Vec<u8>, duration: Duration) -> Self {
        Self { data, duration }
    }

    /// Filler frame for sources that have nothing to capture: Opus silence
    /// for audio, an empty payload at 30 fps for video.
    pub fn blank(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => Self::new(OPUS_SILENCE.to_vec(), Duration::from_millis(20)),
            TrackKind::Video => Self::new(vec![0; 10], Duration::from_millis(33)),
        }
    }
}

/// A running capture (microphone or camera) that can be stopped
pub trait CaptureDevice: Send {
    fn label(&self) -> String;

    /// Next encoded frame, or `None` if nothing new was captured yet.
    fn read_frame(&mut self) -> Option<MediaFrame>;

    /// Mutes or unmutes the capture. Devices without mute ignore it.
    fn set_muted(&mut self, _muted: bool) {}

    /// Current input level in `0.0..=1.0`, for devices that meter.
    fn level(&self) -> Option<f32> {
        None
    }

    /// Stops capturing and releases the hardware. Called at most once.
    fn stop(&mut self);
}

/// Opens capture devices on the current platform
pub trait MediaDevices: Send + Sync {
    /// Opens and starts the default device for `kind`.
    fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureDevice>, MediaError>;
}
