//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers and the route middleware via
//! the `State` extractor. It holds the token-scoped auth service (one HTTP
//! client for the whole process) and the route policy. The stateful
//! per-user client lives in the page layer, not here.

use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::RoutePolicy;

/// Shared application state. Clone is required by Axum; every field is
/// Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<dyn AuthService>,
    pub policy: Arc<RoutePolicy>,
    /// Mark session cookies `Secure`.
    pub cookie_secure: bool,
}

impl AppState {
    #[must_use]
    pub fn new(auth: Arc<dyn AuthService>, policy: RoutePolicy, cookie_secure: bool) -> Self {
        Self { auth, policy: Arc::new(policy), cookie_secure }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::auth::test_helpers::FakeService;

    /// `AppState` over a scripted auth service with the default policy.
    #[must_use]
    pub fn test_app_state(service: Arc<FakeService>) -> AppState {
        AppState::new(service, RoutePolicy::default(), false)
    }
}
