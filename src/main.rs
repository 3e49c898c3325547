use std::sync::Arc;

use carelog::auth::AuthApi;
use carelog::config::{AuthConfig, RoutePolicy, ServerConfig};
use carelog::{routes, state};

#[tokio::main]
async fn main() {
    // A missing .env file is fine; the process environment still applies.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let auth_config = AuthConfig::from_env().expect("auth service config required");
    let policy = RoutePolicy::from_env().expect("invalid route policy");
    let server = ServerConfig::from_env().expect("invalid server config");

    let auth = AuthApi::new(&auth_config).expect("auth HTTP client init failed");
    let max_redirect_attempts = policy.max_redirect_attempts;
    let state = state::AppState::new(Arc::new(auth), policy, server.cookie_secure);

    let app = routes::app(state, &server.site_dir);
    let port = server.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(
        %port,
        auth_url = %auth_config.url,
        callback_url = %server.callback_url(),
        max_redirect_attempts,
        "carelog listening"
    );
    axum::serve(listener, app).await.expect("server failed");
}
