use std::sync::Arc;
use vitalcall::call_engine::NegotiationState;
use vitalcall::call_page::{CAMERA_ERROR, DISCONNECTED_ERROR};
use vitalcall::media::{MediaConstraints, TrackKind};
use vitalcall::{CallPage, LoginResponse, Session};

use crate::integration::{init_tracing, ROOM};
use crate::utils::{wait_until, FakeDevices, MockRelay};

fn session(token: &str) -> Arc<Session> {
    Arc::new(
        Session::login(LoginResponse {
            token: token.into(),
            role: "doctor".into(),
            email: Some("doc@example.com".into()),
        })
        .expect("Failed to sign in"),
    )
}

fn page(relay: &MockRelay, token: &str, devices: FakeDevices) -> CallPage {
    CallPage::new(
        relay.config(),
        Some(session(token)),
        Some(ROOM.to_string()),
        Arc::new(devices),
    )
    .with_constraints(MediaConstraints::audio_only())
}

#[tokio::test]
async fn test_two_pages_negotiate_and_leave() {
    init_tracing();

    let relay = MockRelay::start().await.expect("Failed to start relay");
    let doctor = page(&relay, "tok-doctor", FakeDevices::new());
    let patient = page(&relay, "tok-patient", FakeDevices::new());

    doctor.start_camera().expect("doctor camera");
    patient.start_camera().expect("patient camera");
    doctor.join().await.expect("doctor join");
    assert!(relay.wait_for_participants(ROOM, 1, 2000).await);
    patient.join().await.expect("patient join");

    assert!(
        wait_until(5000, || doctor.negotiation_state() == Some(NegotiationState::Connected))
            .await
    );
    assert_eq!(patient.negotiation_state(), Some(NegotiationState::Answered));
    assert!(doctor.error().is_none());

    patient.teardown().await;
    doctor.teardown().await;

    assert!(!doctor.is_joined());
    assert!(doctor.local_stream().is_none());
    assert!(relay.wait_for_participants(ROOM, 0, 3000).await);
}

#[tokio::test]
async fn test_join_twice_keeps_a_single_connection() {
    init_tracing();

    let relay = MockRelay::start().await.expect("Failed to start relay");
    let doctor = page(&relay, "tok-doctor", FakeDevices::new());

    doctor.join().await.expect("first join");
    doctor.join().await.expect("second join");

    assert!(relay.wait_for_participants(ROOM, 1, 2000).await);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(relay.participants(ROOM), 1);
    doctor.leave().await;
}

#[tokio::test]
async fn test_camera_denied_then_join_without_preview() {
    init_tracing();

    let relay = MockRelay::start().await.expect("Failed to start relay");
    let doctor = page(
        &relay,
        "tok-doctor",
        FakeDevices::new().deny(TrackKind::Audio),
    );

    assert_eq!(doctor.start_camera().unwrap_err(), CAMERA_ERROR);

    doctor.join().await.expect("join without media");
    assert!(doctor.error().is_none());
    assert!(doctor.is_joined());

    doctor.teardown().await;
}

#[tokio::test]
async fn test_rejoin_after_relay_drops_socket() {
    init_tracing();

    let relay = MockRelay::start().await.expect("Failed to start relay");
    let doctor = page(&relay, "tok-doctor", FakeDevices::new());

    doctor.join().await.expect("first join");
    assert!(relay.wait_for_participants(ROOM, 1, 2000).await);

    relay.kick_all(ROOM);

    assert!(
        wait_until(3000, || doctor.error().as_deref() == Some(DISCONNECTED_ERROR)).await,
        "dropped relay socket was not reported"
    );
    assert!(!doctor.is_joined());

    doctor.join().await.expect("rejoin");

    assert!(doctor.is_joined());
    assert!(doctor.error().is_none());
    assert!(relay.wait_for_participants(ROOM, 1, 2000).await);
    assert_eq!(relay.tokens().iter().filter(|t| *t == "tok-doctor").count(), 2);

    doctor.leave().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_stream_cleared_when_peer_leaves() {
    init_tracing();

    let relay = MockRelay::start().await.expect("Failed to start relay");
    let patient_devices = FakeDevices::new();
    let doctor = page(&relay, "tok-doctor", FakeDevices::new());
    let patient = page(&relay, "tok-patient", patient_devices.clone());

    doctor.start_camera().expect("doctor camera");
    patient.start_camera().expect("patient camera");
    doctor.join().await.expect("doctor join");
    assert!(relay.wait_for_participants(ROOM, 1, 2000).await);
    patient.join().await.expect("patient join");

    assert!(
        wait_until(10_000, || doctor.remote_stream().is_some()).await,
        "patient media never reached the doctor"
    );
    assert!(patient_devices.frames() > 0);
    assert_eq!(doctor.remote_stream().map(|s| s.track_count()), Some(1));

    patient.teardown().await;

    assert!(
        wait_until(3000, || doctor.remote_stream().is_none()).await,
        "remote stream outlived the peer"
    );
    assert!(doctor.is_joined());

    doctor.teardown().await;
}
