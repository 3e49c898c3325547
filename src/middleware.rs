//! Route middleware — per-request redirect rules ahead of every page.
//!
//! DESIGN
//! ======
//! `route_decision` is a pure rule table over (path, session present):
//!
//! 1. public prefix (assets, API, health) → pass through
//! 2. no session, not the login view → `/login?redirectTo=<path>`
//! 3. session, on the login view → destination
//! 4. otherwise → pass through
//!
//! Session presence is read from the request alone (cookie or bearer
//! header); the middleware never calls the auth service. `session_redirect`
//! wraps the table as an axum middleware answering `307`.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::types::unix_now;
use crate::config::RoutePolicy;
use crate::routes::auth::{ACCESS_TOKEN_COOKIE, EXPIRES_AT_COOKIE};
use crate::state::AppState;

/// Query parameter carrying the page to return to after login.
pub const REDIRECT_PARAM: &str = "redirectTo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    PassThrough,
    RedirectToLogin { location: String },
    RedirectToDestination { location: String },
}

impl RouteDecision {
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::PassThrough => None,
            Self::RedirectToLogin { location } | Self::RedirectToDestination { location } => Some(location),
        }
    }
}

// =============================================================================
// RULE TABLE
// =============================================================================

/// Decide what to do with a request for `path`.
#[must_use]
pub fn route_decision(path: &str, has_session: bool, policy: &RoutePolicy) -> RouteDecision {
    if is_public_path(path, &policy.public_prefixes) {
        return RouteDecision::PassThrough;
    }
    let on_login = is_login_path(path, &policy.login_path);
    match (has_session, on_login) {
        (false, false) => RouteDecision::RedirectToLogin { location: login_location(&policy.login_path, path) },
        (true, true) => RouteDecision::RedirectToDestination { location: policy.destination.clone() },
        _ => RouteDecision::PassThrough,
    }
}

/// Prefix match on whole path segments: `/api` covers `/api` and
/// `/api/x` but not `/apiary`.
#[must_use]
pub fn is_public_path(path: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        let prefix = prefix.as_str();
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'))
    })
}

#[must_use]
pub fn is_login_path(path: &str, login_path: &str) -> bool {
    path == login_path || path.strip_suffix('/') == Some(login_path)
}

/// Login URL that sends the user back to `requested` afterwards.
#[must_use]
pub fn login_location(login_path: &str, requested: &str) -> String {
    format!("{login_path}?{REDIRECT_PARAM}={}", encode_query_value(requested))
}

/// Accept a post-login target only if it stays on this site.
///
/// Control characters reject the target outright: browsers drop tab and
/// newline while parsing a URL, so `/\t/host` would resolve to `//host`.
#[must_use]
pub fn safe_redirect_target(requested: Option<&str>, fallback: &str) -> String {
    match requested.map(str::trim) {
        Some(target) if is_local_path(target) => target.to_owned(),
        _ => fallback.to_owned(),
    }
}

fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control)
}

/// Escape the characters that would break out of a query value. Slashes
/// stay readable.
fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '+' => out.push_str("%2B"),
            '=' => out.push_str("%3D"),
            '#' => out.push_str("%23"),
            ' ' => out.push_str("%20"),
            _ => out.push(c),
        }
    }
    out
}

// =============================================================================
// REQUEST INSPECTION
// =============================================================================

/// Whether the request carries a session: a non-empty access-token cookie
/// that has not passed its recorded expiry, or a bearer token.
#[must_use]
pub fn request_has_session(headers: &HeaderMap, now: i64) -> bool {
    let jar = CookieJar::from_headers(headers);
    if let Some(token) = jar.get(ACCESS_TOKEN_COOKIE).map(|c| c.value().trim())
        && !token.is_empty()
    {
        let expired = jar
            .get(EXPIRES_AT_COOKIE)
            .and_then(|c| c.value().trim().parse::<i64>().ok())
            .is_some_and(|expires_at| expires_at <= now);
        if !expired {
            return true;
        }
    }
    bearer_token(headers).is_some()
}

/// Token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// =============================================================================
// AXUM MIDDLEWARE
// =============================================================================

/// Apply the rule table; redirect with `307` or hand the request on.
pub async fn session_redirect(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let has_session = request_has_session(req.headers(), unix_now());

    match route_decision(&path, has_session, &state.policy) {
        RouteDecision::PassThrough => next.run(req).await,
        RouteDecision::RedirectToLogin { location } => {
            tracing::debug!(path = %path, to = %location, "no session, redirecting to login");
            Redirect::temporary(&location).into_response()
        }
        RouteDecision::RedirectToDestination { location } => {
            tracing::debug!(path = %path, to = %location, "session present, leaving login view");
            Redirect::temporary(&location).into_response()
        }
    }
}

#[cfg(test)]
#[path = "middleware_test.rs"]
mod tests;
