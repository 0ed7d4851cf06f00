//! Rooms Module - REST client for the video room service
//!
//! Rooms are created, looked up and removed server-side. The client only
//! ever reads the room code it is handed back.

mod client;
mod models;

pub use client::{RoomError, RoomsClient};
pub use models::*;
