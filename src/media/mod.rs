//! Media Module - local camera and microphone capture
//!
//! This module owns the lifecycle of local capture:
//! - Opening capture devices through the `MediaDevices` seam
//! - Exposing each device as an outbound WebRTC track
//! - Stopping every track on release (idempotent)

#[cfg(feature = "native-audio")]
mod audio;
mod devices;
mod stream;

#[cfg(feature = "native-audio")]
pub use audio::{CpalDevices, MicrophoneCapture, CHANNELS, FRAME_SIZE, SAMPLE_RATE};
pub use devices::{
    CaptureDevice, MediaConstraints, MediaDevices, MediaError, MediaFrame, TrackKind,
};
pub use stream::{acquire_local_media, release_media, LocalMediaStream, MediaTrack};
