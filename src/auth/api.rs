//! Hosted auth REST API client.
//!
//! Thin HTTP wrapper for the `/auth/v1` endpoints: password grant, refresh
//! grant, user lookup and logout. Stateless; pure parsing in
//! `parse_token_response` and `parse_error_message` for testability.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::types::{AuthError, Principal, Session, unix_now};
use crate::config::AuthConfig;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// AUTH SERVICE TRAIT
// =============================================================================

/// Token-scoped operations against the hosted auth service. Enables mocking
/// in tests.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Exchange email + password for a fresh session.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Exchange a refresh token for a new session.
    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError>;

    /// Resolve the principal behind an access token.
    async fn get_user(&self, access_token: &str) -> Result<Principal, AuthError>;

    /// Revoke the session behind an access token.
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct AuthApi {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl AuthApi {
    /// Build a client for the configured auth service.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AuthError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: config.url.clone(), anon_key: config.anon_key.clone() })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{path}", self.base_url)
    }
}

#[async_trait]
impl AuthService for AuthApi {
    /// `POST /auth/v1/token?grant_type=password`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Api`] for rejected credentials, or a transport /
    /// decode error.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .http
            .post(self.endpoint("/token?grant_type=password"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        parse_token_response(status, &body, unix_now())
    }

    /// `POST /auth/v1/token?grant_type=refresh_token`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Api`] when the refresh token is revoked or expired.
    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let response = self
            .http
            .post(self.endpoint("/token?grant_type=refresh_token"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        parse_token_response(status, &body, unix_now())
    }

    /// `GET /auth/v1/user` — resolve the principal behind an access token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Api`] with status 401 for an invalid token.
    async fn get_user(&self, access_token: &str) -> Result<Principal, AuthError> {
        let response = self
            .http
            .get(self.endpoint("/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(AuthError::Api { status, message: parse_error_message(&body) });
        }
        serde_json::from_str(&body).map_err(|e| AuthError::Decode(e.to_string()))
    }

    /// `POST /auth/v1/logout` — revoke the session behind an access token.
    ///
    /// A token the service no longer knows (401/403/404) counts as signed out.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures and any other non-success status.
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.endpoint("/logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        if logout_confirmed(status) {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AuthError::Api { status, message: parse_error_message(&body) })
    }
}

// =============================================================================
// PARSING
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    refresh_token: String,
    user: Principal,
}

pub(crate) fn logout_confirmed(status: u16) -> bool {
    (200..300).contains(&status) || matches!(status, 401 | 403 | 404)
}

/// Turn a token-endpoint response into a [`Session`]. `now` anchors
/// `expires_in` when the service omits `expires_at`.
pub(crate) fn parse_token_response(status: u16, body: &str, now: i64) -> Result<Session, AuthError> {
    if !(200..300).contains(&status) {
        return Err(AuthError::Api { status, message: parse_error_message(body) });
    }
    let resp: TokenResponse = serde_json::from_str(body).map_err(|e| AuthError::Decode(e.to_string()))?;
    let expires_at = match (resp.expires_at, resp.expires_in) {
        (Some(at), _) => at,
        (None, Some(secs)) => now + secs,
        (None, None) => return Err(AuthError::Decode("token response has no expiry".into())),
    };
    Ok(Session {
        access_token: resp.access_token,
        refresh_token: resp.refresh_token,
        expires_at,
        token_type: resp.token_type.unwrap_or_else(|| "bearer".to_owned()),
        user: resp.user,
    })
}

/// Pull a human-readable message out of an error body. The service uses
/// several shapes depending on the endpoint.
pub(crate) fn parse_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_owned();
    };
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
        .map_or_else(|| body.trim().to_owned(), str::to_owned)
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
