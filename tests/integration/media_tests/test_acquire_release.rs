use vitalcall::media::{
    acquire_local_media, release_media, MediaConstraints, MediaError, TrackKind,
};

use crate::integration::init_tracing;
use crate::utils::FakeDevices;

#[test]
fn test_default_constraints_open_camera_and_microphone() {
    init_tracing();

    let devices = FakeDevices::new();
    let stream = acquire_local_media(&devices, MediaConstraints::default())
        .expect("Failed to acquire media");

    let kinds: Vec<TrackKind> = stream.tracks().iter().map(|t| t.kind()).collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&TrackKind::Audio));
    assert!(kinds.contains(&TrackKind::Video));
    assert!(stream.is_live());
    assert_eq!(devices.opened(), 2);
}

#[test]
fn test_denied_camera_stops_the_microphone_again() {
    init_tracing();

    let devices = FakeDevices::new().deny(TrackKind::Video);
    let err = acquire_local_media(&devices, MediaConstraints::default()).unwrap_err();

    assert_eq!(err, MediaError::PermissionDenied(TrackKind::Video));
    assert_eq!(devices.opened(), 1);
    assert_eq!(devices.stopped(), 1);
}

#[test]
fn test_missing_device_is_reported() {
    init_tracing();

    let devices = FakeDevices::new().without(TrackKind::Audio);
    let err = acquire_local_media(&devices, MediaConstraints::default()).unwrap_err();

    assert!(matches!(
        err,
        MediaError::DeviceUnavailable {
            kind: TrackKind::Audio,
            ..
        }
    ));
    assert!(err.to_string().contains("microphone"));
}

#[test]
fn test_release_is_idempotent() {
    init_tracing();

    let devices = FakeDevices::new();
    let stream = acquire_local_media(&devices, MediaConstraints::default())
        .expect("Failed to acquire media");

    release_media(None);
    release_media(Some(&stream));
    release_media(Some(&stream));

    assert!(!stream.is_live());
    assert_eq!(stream.live_tracks().count(), 0);
    assert_eq!(devices.stopped(), 2);
}
