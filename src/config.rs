//! Client configuration
//!
//! Resolves where the video service lives and how calls are negotiated:
//! - HTTP base for the room API (remote override or relative default)
//! - WebSocket base for the signaling relay
//! - STUN/TURN servers and timeouts

use once_cell::sync::Lazy;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Path prefix under which the front end proxies the video service when no
/// remote base is configured.
pub const DEFAULT_RELATIVE_BASE: &str = "/video";

/// Origin the relative default is joined to.
pub const DEFAULT_APP_ORIGIN: &str = "http://localhost:3000";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);

static DEFAULT_STUN_URLS: Lazy<Vec<String>> = Lazy::new(|| {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
});

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid video service URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

// ============================================================================
// VIDEO CONFIG
// ============================================================================

/// Settings for the room API, the signaling relay and peer connections
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Remote HTTP(S) base of the video service. `None` selects the
    /// relative default.
    pub api_url: Option<String>,
    /// Origin used to absolutise the relative default.
    pub app_origin: String,
    pub ice_servers: Vec<RTCIceServer>,
    pub connect_timeout: Duration,
    pub negotiation_timeout: Duration,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            app_origin: DEFAULT_APP_ORIGIN.to_string(),
            ice_servers: default_ice_servers(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }
}

impl VideoConfig {
    /// Config pointing at a remote video service.
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: Some(api_url.into()),
            ..Self::default()
        }
    }

    /// Reads the `VIDEO_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("VIDEO_API_URL").filter(|v| !v.trim().is_empty()) {
            config.api_url = Some(url.trim().to_string());
        }
        if let Some(origin) = lookup("VIDEO_APP_ORIGIN").filter(|v| !v.trim().is_empty()) {
            config.app_origin = origin.trim().to_string();
        }
        if let Some(servers) = lookup("VIDEO_ICE_SERVERS") {
            let urls: Vec<String> = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            config.ice_servers = if urls.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls,
                    ..Default::default()
                }]
            };
        }
        if let Some(secs) = lookup("VIDEO_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = parse_secs("VIDEO_CONNECT_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("VIDEO_NEGOTIATION_TIMEOUT_SECS") {
            config.negotiation_timeout = parse_secs("VIDEO_NEGOTIATION_TIMEOUT_SECS", &secs)?;
        }

        Ok(config)
    }

    /// Adds a TURN server with credentials
    pub fn add_turn_server(&mut self, url: String, username: String, credential: String) {
        self.ice_servers.push(RTCIceServer {
            urls: vec![url],
            username,
            credential,
            ..Default::default()
        });
    }

    /// HTTP base of the video service, without trailing slash.
    pub fn http_base(&self) -> String {
        match self.api_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => DEFAULT_RELATIVE_BASE.to_string(),
        }
    }

    /// Absolute HTTP base. A relative base is joined to `app_origin`.
    pub fn http_base_url(&self) -> Result<Url, ConfigError> {
        let base = self.http_base();
        let absolute = if is_http_url(&base) {
            base
        } else {
            format!("{}{}", self.app_origin.trim_end_matches('/'), base)
        };
        Url::parse(&absolute).map_err(|e| ConfigError::InvalidBaseUrl {
            url: absolute.clone(),
            reason: e.to_string(),
        })
    }

    /// Signaling base with the scheme mapped to its socket counterpart
    /// (`https` -> `wss`, `http` -> `ws`).
    pub fn ws_base_url(&self) -> Result<Url, ConfigError> {
        let http = self.http_base_url()?;
        let scheme = match http.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        let mapped = format!("{}{}", scheme, &http.as_str()[http.scheme().len()..]);
        Url::parse(&mapped).map_err(|e| ConfigError::InvalidBaseUrl {
            url: mapped.clone(),
            reason: e.to_string(),
        })
    }

    /// `{wsBase}/ws/{code}?token={token}`, both values percent-encoded.
    pub fn signaling_url(&self, code: &str, token: &str) -> Result<Url, ConfigError> {
        let mut url = self.ws_base_url()?;
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidBaseUrl {
                url: self.http_base(),
                reason: "cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push("ws")
            .push(code);
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }

    /// Absolute URL of a room API endpoint below the HTTP base.
    pub fn api_endpoint(&self, segments: &[&str]) -> Result<Url, ConfigError> {
        let mut url = self.http_base_url()?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ConfigError::InvalidBaseUrl {
                    url: self.http_base(),
                    reason: "cannot be a base".to_string(),
                })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

/// Default STUN configuration
pub fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![RTCIceServer {
        urls: DEFAULT_STUN_URLS.clone(),
        ..Default::default()
    }]
}

fn is_http_url(base: &str) -> bool {
    base.starts_with("http://") || base.starts_with("https://")
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}
