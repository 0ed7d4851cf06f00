//! Authenticated user context
//!
//! A `Session` is created from the login response and handed explicitly to
//! whatever needs the bearer token. Logging out consumes it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Login response did not contain a token")]
    MissingToken,
}

// ============================================================================
// USER ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Patient,
    Doctor,
    Admin,
}

impl FromStr for UserRole {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Self::Patient),
            "doctor" => Ok(Self::Doctor),
            "admin" => Ok(Self::Admin),
            _ => Err(SessionError::UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Patient => "patient",
            Self::Doctor => "doctor",
            Self::Admin => "admin",
        };
        f.write_str(name)
    }
}

// ============================================================================
// LOGIN RESPONSE
// ============================================================================

/// Body returned by the users service on login.
///
/// Some deployments spell the email field `emailAddress` or `emailAddres`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub role: String,
    #[serde(default, alias = "emailAddress", alias = "emailAddres")]
    pub email: Option<String>,
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    email: String,
    role: UserRole,
    #[serde(skip)]
    token: String,
    signed_in_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenClaims {
    exp: Option<i64>,
}

impl Session {
    /// Builds the session from a login response.
    pub fn login(response: LoginResponse) -> Result<Self, SessionError> {
        if response.token.trim().is_empty() {
            return Err(SessionError::MissingToken);
        }
        let role = response.role.parse()?;
        let session = Self {
            email: response.email.unwrap_or_default(),
            role,
            token: response.token,
            signed_in_at: Utc::now(),
        };
        tracing::info!("Signed in as {} ({})", session.email, session.role);
        Ok(session)
    }

    /// Ends the session. The token is dropped with it.
    pub fn logout(self) {
        tracing::info!("Signed out {}", self.email);
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> UserRole {
        self.role
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn signed_in_at(&self) -> DateTime<Utc> {
        self.signed_in_at
    }

    /// Expiry from the token's `exp` claim, if the token is a readable JWT.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let payload = self.token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
        Utc.timestamp_opt(claims.exp?, 0).single()
    }

    /// Tokens without a readable expiry are treated as still valid.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }
}
