//! Auth routes — password sign-in, sign-out, token refresh, session lookup
//! and the post-login callback.
//!
//! Session cookies are HttpOnly and `SameSite=Lax`. `sb-expires-at` mirrors
//! the access token expiry so the route middleware can spot a stale cookie
//! without calling the auth service.

use axum::extract::{FromRef, FromRequest, FromRequestParts, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::Form;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use time::Duration;

use crate::auth::types::unix_now;
use crate::auth::{AuthError, Principal, Session};
use crate::middleware::{bearer_token, safe_redirect_target};
use crate::state::AppState;

pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
pub const REFRESH_TOKEN_COOKIE: &str = "sb-refresh-token";
pub const EXPIRES_AT_COOKIE: &str = "sb-expires-at";

/// Lifetime of the refresh-token cookie.
const REFRESH_COOKIE_MAX_AGE: Duration = Duration::days(30);

// =============================================================================
// EXTRACTORS
// =============================================================================

/// Access token from the session cookie, or a bearer header as fallback.
#[must_use]
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    jar.get(ACCESS_TOKEN_COOKIE)
        .map(|c| c.value().trim().to_owned())
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers).map(str::to_owned))
}

/// Request access token. Rejects with 401 when none is present.
pub struct SessionToken(pub String);

impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, _state: &S) -> Result<Self, Self::Rejection> {
        session_token(&parts.headers).map(Self).ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Authenticated principal, verified with the auth service.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: Principal,
    pub token: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let SessionToken(token) = SessionToken::from_request_parts(parts, state).await?;
        let app_state = AppState::from_ref(state);
        let user = app_state.auth.get_user(&token).await.map_err(|e| {
            if e.is_unauthorized() {
                StatusCode::UNAUTHORIZED
            } else {
                tracing::error!(error = %e, "user lookup failed");
                StatusCode::BAD_GATEWAY
            }
        })?;
        Ok(Self { user, token })
    }
}

// =============================================================================
// COOKIES
// =============================================================================

fn base_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

fn session_cookies(jar: CookieJar, session: &Session, secure: bool, now: i64) -> CookieJar {
    let ttl = Duration::seconds((session.expires_at - now).max(0));

    let mut access = base_cookie(ACCESS_TOKEN_COOKIE, session.access_token.clone(), secure);
    access.set_max_age(ttl);
    let mut expires = base_cookie(EXPIRES_AT_COOKIE, session.expires_at.to_string(), secure);
    expires.set_max_age(ttl);
    let mut refresh = base_cookie(REFRESH_TOKEN_COOKIE, session.refresh_token.clone(), secure);
    refresh.set_max_age(REFRESH_COOKIE_MAX_AGE);

    jar.add(access).add(expires).add(refresh)
}

fn clear_session_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    [ACCESS_TOKEN_COOKIE, EXPIRES_AT_COOKIE, REFRESH_TOKEN_COOKIE]
        .into_iter()
        .fold(jar, |jar, name| {
            let mut cookie = base_cookie(name, String::new(), secure);
            cookie.set_max_age(Duration::ZERO);
            jar.add(cookie)
        })
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
    #[serde(rename = "redirectTo")]
    redirect_to: Option<String>,
}

/// Accept the sign-in body as JSON or as a submitted form.
async fn read_login_request(req: Request, state: &AppState) -> Result<LoginRequest, Response> {
    let is_form = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        Form::<LoginRequest>::from_request(req, state)
            .await
            .map(|Form(body)| body)
            .map_err(IntoResponse::into_response)
    } else {
        Json::<LoginRequest>::from_request(req, state)
            .await
            .map(|Json(body)| body)
            .map_err(IntoResponse::into_response)
    }
}

/// `POST /api/auth/login` — password sign-in; sets session cookies and
/// returns where the page should go next.
pub async fn login(State(state): State<AppState>, jar: CookieJar, req: Request) -> Response {
    let body = match read_login_request(req, &state).await {
        Ok(body) => body,
        Err(rejection) => return rejection,
    };
    let email = body.email.trim();
    if email.is_empty() || body.password.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "email and password are required");
    }

    let session = match state.auth.sign_in_with_password(email, &body.password).await {
        Ok(session) => session,
        Err(e) => return login_error(&e),
    };

    let redirect_to = safe_redirect_target(body.redirect_to.as_deref(), &state.policy.destination);
    tracing::info!(user_id = %session.user.id, to = %redirect_to, "password sign-in");
    let jar = session_cookies(jar, &session, state.cookie_secure, unix_now());
    let payload = serde_json::json!({ "redirectTo": redirect_to, "user": session.user });
    (jar, Json(payload)).into_response()
}

fn login_error(e: &AuthError) -> Response {
    match e {
        AuthError::Api { message, .. } if e.is_unauthorized() => error_body(StatusCode::UNAUTHORIZED, message),
        _ => {
            tracing::error!(error = %e, "sign-in request failed");
            error_body(StatusCode::BAD_GATEWAY, "auth service unavailable")
        }
    }
}

/// `POST /api/auth/logout` — revoke the session, then clear cookies. A
/// failed revoke keeps the cookies so the user stays signed in.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap, jar: CookieJar) -> Response {
    if let Some(token) = session_token(&headers) {
        if let Err(e) = state.auth.sign_out(&token).await {
            tracing::warn!(error = %e, "sign-out failed, keeping session cookies");
            return error_body(StatusCode::BAD_GATEWAY, "sign-out failed, please try again");
        }
    }
    (clear_session_cookies(jar, state.cookie_secure), StatusCode::NO_CONTENT).into_response()
}

/// `POST /api/auth/refresh` — trade the refresh-token cookie for a new
/// session and re-issue the session cookies. A rejected refresh token
/// clears them.
pub async fn refresh(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(refresh_token) = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().trim().to_owned())
        .filter(|t| !t.is_empty())
    else {
        return error_body(StatusCode::UNAUTHORIZED, "no refresh token");
    };

    match state.auth.refresh(&refresh_token).await {
        Ok(session) => {
            tracing::debug!(user_id = %session.user.id, expires_at = session.expires_at, "session refreshed");
            let jar = session_cookies(jar, &session, state.cookie_secure, unix_now());
            let payload = serde_json::json!({ "user": session.user, "expiresAt": session.expires_at });
            (jar, Json(payload)).into_response()
        }
        Err(e) if e.is_unauthorized() => {
            tracing::info!(error = %e, "refresh rejected, clearing session cookies");
            let jar = clear_session_cookies(jar, state.cookie_secure);
            (jar, error_body(StatusCode::UNAUTHORIZED, "session expired")).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "session refresh failed");
            error_body(StatusCode::BAD_GATEWAY, "auth service unavailable")
        }
    }
}

/// `GET /api/auth/session` — current principal.
pub async fn session(auth: AuthUser) -> Json<Principal> {
    Json(auth.user)
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(rename = "redirectTo")]
    redirect_to: Option<String>,
}

/// `GET /auth/callback` — land after an external sign-in on a safe local
/// page.
pub async fn callback(State(state): State<AppState>, Query(params): Query<CallbackQuery>) -> Redirect {
    let target = safe_redirect_target(params.redirect_to.as_deref(), &state.policy.destination);
    Redirect::temporary(&target)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
