//! Request and response bodies of the room API

use serde::{Deserialize, Serialize};

/// Body of `POST /rooms`. Serialises to `{}` without a title.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateRoomRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Room returned on creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub code: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Room returned by `GET /rooms/{code}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomDetails {
    pub code: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: String,
}

/// Result of `DELETE /rooms/{code}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DeleteRoomResponse {
    pub deleted: u64,
}
