//! Signaling Module - WebSocket channel to the signaling relay
//!
//! This module handles the relay side of a call:
//! - Opening `{wsBase}/ws/{code}?token=...`
//! - Decoding inbound frames into typed messages
//! - Sending offers, answers and candidates while the socket is open

mod channel;
mod messages;

pub use channel::{ChannelState, SignalingChannel, SignalingError, SignalingEvent, SignalingSink};
pub use messages::*;
