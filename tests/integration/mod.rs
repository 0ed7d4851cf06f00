pub mod call_page_tests;
pub mod media_tests;

use std::sync::Arc;
use tracing::Level;
use vitalcall::media::{acquire_local_media, LocalMediaStream, MediaConstraints};
use vitalcall::{connect_to_room, ConnectOptions, Connection};

use crate::utils::{FakeDevices, MockRelay};

pub const ROOM: &str = "abc123";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn audio_stream() -> Arc<LocalMediaStream> {
    acquire_local_media(&FakeDevices::new(), MediaConstraints::audio_only())
        .expect("Failed to acquire fake audio")
}

/// Joins `ROOM` with a fake microphone and waits until the relay has
/// registered the socket.
pub async fn join(relay: &MockRelay, token: &str) -> Connection {
    let before = relay.participants(ROOM);
    let options = ConnectOptions::new(token, ROOM).with_local_stream(audio_stream());
    let connection = connect_to_room(&relay.config(), options)
        .await
        .expect("Failed to join room");
    assert!(
        relay.wait_for_participants(ROOM, before + 1, 2000).await,
        "relay did not register the socket"
    );
    connection
}
