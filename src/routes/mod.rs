//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! API and auth endpoints are bound here; every other path falls through to
//! the pre-built page bundle served from the site directory. The session
//! redirect middleware wraps all of it, routes and fallback alike, so a
//! protected page is never served without a session.

pub mod auth;

use std::path::Path;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::middleware::session_redirect;
use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState, site_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let site = ServeDir::new(site_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/session", get(auth::session))
        .route("/auth/callback", get(auth::callback))
        .route("/healthz", get(healthz))
        .fallback_service(site)
        .layer(axum::middleware::from_fn_with_state(state.clone(), session_redirect))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
