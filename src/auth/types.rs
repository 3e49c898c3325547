//! Auth types — sessions, principals, auth-state events and errors.
//!
//! Shared by the REST client, the stateful auth client, the event bus and
//! the session guard.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by auth backend operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The request never produced a response (DNS, connect, timeout).
    #[error("auth request failed: {0}")]
    Transport(String),

    /// The auth service answered with a non-success status.
    #[error("auth service error: status {status}: {message}")]
    Api { status: u16, message: String },

    /// The auth service response body could not be decoded.
    #[error("auth response parse failed: {0}")]
    Decode(String),

    /// The operation needs a session and none is active.
    #[error("no active session")]
    NoSession,
}

impl AuthError {
    /// `true` when the service rejected the caller's credentials or token.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { status: 400 | 401 | 403, .. } | Self::NoSession)
    }

    /// `true` when retrying the same call may succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Api { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Authenticated principal attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Token-bearing credential for an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as unix seconds.
    pub expires_at: i64,
    pub token_type: String,
    pub user: Principal,
}

impl Session {
    /// Whether the access token is still usable at `now` (unix seconds).
    #[must_use]
    pub fn is_valid_at(&self, now: i64) -> bool {
        !self.access_token.is_empty() && now < self.expires_at
    }

    /// Whether the access token is still usable right now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(unix_now())
    }

    /// Whether the token expires within `margin_secs` of `now`.
    #[must_use]
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        self.expires_at - now <= margin_secs
    }
}

/// Current wall-clock time as unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

// =============================================================================
// AUTH EVENTS
// =============================================================================

/// Discriminant of an [`AuthEvent`], named as the auth service names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    InitialSession,
}

impl AuthEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::InitialSession => "INITIAL_SESSION",
        }
    }
}

impl std::fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification of a change in session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    /// Emitted once when a subscription is established, carrying whatever
    /// session the client already holds.
    InitialSession(Option<Session>),
}

impl AuthEvent {
    #[must_use]
    pub fn kind(&self) -> AuthEventKind {
        match self {
            Self::SignedIn(_) => AuthEventKind::SignedIn,
            Self::SignedOut => AuthEventKind::SignedOut,
            Self::TokenRefreshed(_) => AuthEventKind::TokenRefreshed,
            Self::InitialSession(_) => AuthEventKind::InitialSession,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(s) | Self::TokenRefreshed(s) => Some(s),
            Self::InitialSession(s) => s.as_ref(),
            Self::SignedOut => None,
        }
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
