//! Authentication core — session store, auth event fan-out and the page
//! session guard.
//!
//! ARCHITECTURE
//! ============
//! `api` talks to the hosted auth REST endpoints and is token-scoped.
//! `client` wraps it into a stateful client holding one current session and
//! emitting auth-state events. `store` owns the shared client for the page
//! layer, `bus` fans the client's single upstream subscription out to many
//! listeners, and `guard` drives page-entry redirects off both.

pub mod api;
pub mod bus;
pub mod client;
pub mod guard;
pub mod store;
pub mod types;

pub use api::{AuthApi, AuthService};
pub use bus::{AuthEventBus, ListenerError, ListenerHandle, ListenerId};
pub use client::{AuthBackend, AuthCallback, HostedAuthClient, UpstreamSubscription};
pub use guard::{GuardConfig, GuardFailure, GuardState, Liveness, Navigator, PageLoader, Recovery, SessionGuard};
pub use store::SessionStore;
pub use types::{AuthError, AuthEvent, AuthEventKind, Principal, Session};

#[cfg(test)]
pub(crate) mod test_helpers;
