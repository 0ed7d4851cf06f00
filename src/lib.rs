//! vitalcall - video call connection core
//!
//! The client side of a two-party consultation call:
//! - Room creation and lookup over the video REST service
//! - Local camera/microphone capture
//! - WebSocket signaling through the room relay
//! - WebRTC offer/answer/candidate negotiation and teardown

pub mod call_engine;
pub mod call_page;
pub mod config;
pub mod media;
pub mod rooms;
pub mod session;
pub mod signaling;

pub use call_engine::{connect_to_room, CallError, ConnectOptions, Connection, ConnectionEvent};
pub use call_page::CallPage;
pub use config::VideoConfig;
pub use media::{acquire_local_media, release_media, LocalMediaStream, MediaConstraints};
pub use rooms::{Room, RoomError, RoomsClient};
pub use session::{LoginResponse, Session, UserRole};

use tracing_subscriber::EnvFilter;

// ============================================================================
// LOGGING
// ============================================================================

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` is honoured; this crate logs at debug and webrtc at warn on
/// top of it. Calling it again after a subscriber is set does nothing.
pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["vitalcall=debug", "webrtc=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
    {
        tracing::info!("Initializing vitalcall...");
    }
}
