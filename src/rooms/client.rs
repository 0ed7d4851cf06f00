//! HTTP client for the room API
//!
//! Every call is authenticated with the session's bearer token. Non-2xx
//! responses keep their status and body text so the call page can show
//! them verbatim.

use super::models::*;
use crate::config::{ConfigError, VideoConfig};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("Room creation failed: {status} {body}")]
    CreationFailed { status: StatusCode, body: String },

    #[error("Room not found: {0}")]
    NotFound(String),

    #[error("Room request failed: {status} {body}")]
    RequestFailed { status: StatusCode, body: String },

    #[error("Room service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected room response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// ROOMS CLIENT
// ============================================================================

/// Client for `{videoApiBase}/rooms`
#[derive(Debug, Clone)]
pub struct RoomsClient {
    http: Client,
    config: VideoConfig,
}

impl RoomsClient {
    pub fn new(config: VideoConfig) -> Self {
        Self::with_http_client(Client::new(), config)
    }

    /// Reuses an existing HTTP client (connection pool, proxies, ...).
    pub fn with_http_client(http: Client, config: VideoConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    /// Creates a new room and returns its code
    pub async fn create_room(&self, token: &str) -> Result<Room, RoomError> {
        self.create_with(token, CreateRoomRequest::default()).await
    }

    /// Creates a new room with a display title
    pub async fn create_room_with_title(
        &self,
        token: &str,
        title: impl Into<String>,
    ) -> Result<Room, RoomError> {
        let request = CreateRoomRequest {
            title: Some(title.into()),
        };
        self.create_with(token, request).await
    }

    async fn create_with(&self, token: &str, request: CreateRoomRequest) -> Result<Room, RoomError> {
        let url = self.config.api_endpoint(&["rooms"])?;
        tracing::info!("Creating room at {}", url);

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = body_text(response).await;
            tracing::warn!("Room creation rejected: {} {}", status, body);
            return Err(RoomError::CreationFailed { status, body });
        }

        let room: Room = decode(response).await?;
        tracing::info!("Room created: {}", room.code);
        Ok(room)
    }

    /// Looks up an existing room
    pub async fn get_room(&self, token: &str, code: &str) -> Result<RoomDetails, RoomError> {
        let url = self.config.api_endpoint(&["rooms", code])?;

        let response = self.http.get(url).bearer_auth(token).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(RoomError::NotFound(code.to_string())),
            status if status.is_success() => decode(response).await,
            status => Err(RoomError::RequestFailed {
                status,
                body: body_text(response).await,
            }),
        }
    }

    /// Deletes a room; returns how many rooms were removed
    pub async fn delete_room(&self, token: &str, code: &str) -> Result<u64, RoomError> {
        let url = self.config.api_endpoint(&["rooms", code])?;

        let response = self.http.delete(url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RoomError::RequestFailed {
                status,
                body: body_text(response).await,
            });
        }

        let result: DeleteRoomResponse = decode(response).await?;
        tracing::info!("Deleted {} room(s) for code {}", result.deleted, code);
        Ok(result.deleted)
    }
}

async fn body_text(response: Response) -> String {
    response.text().await.unwrap_or_default()
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RoomError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| RoomError::InvalidResponse(e.to_string()))
}
