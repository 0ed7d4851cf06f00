//! Call Engine Module - WebRTC negotiation for one room
//!
//! This module manages:
//! - The negotiation state machine (offer/answer/candidates)
//! - The single peer connection of a call
//! - Remote streams surfaced to the UI
//! - Joining and leaving a room

mod connection;
mod orchestrator;
mod remote;
mod state;

pub use connection::{connect_to_room, CallError, ConnectOptions, Connection};
pub use orchestrator::{
    ConnectionEvent, NegotiationError, PeerOrchestrator, RemoteStreamCallback,
};
pub use remote::RemoteStream;
pub use state::{next_action, NegotiationAction, NegotiationEvent, NegotiationState};
