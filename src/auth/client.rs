//! Stateful auth client — the contract the session store and event bus
//! depend on, plus the production implementation.
//!
//! DESIGN
//! ======
//! `HostedAuthClient` keeps the current session in memory (nothing is
//! persisted) and announces every change to the callbacks registered with
//! `on_auth_state_change`. A new registration immediately receives an
//! `InitialSession` event carrying whatever session is already held.
//!
//! Callbacks run outside the state lock so they may call back into the
//! client.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::api::{AuthApi, AuthService};
use super::types::{AuthError, AuthEvent, Session, unix_now};
use crate::config::AuthConfig;

/// Refresh this many seconds before the access token actually expires.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Callback receiving auth-state events from the client.
pub type AuthCallback = Arc<dyn Fn(AuthEvent) + Send + Sync>;

// =============================================================================
// UPSTREAM SUBSCRIPTION
// =============================================================================

/// Live registration with a client's auth-state stream. Unsubscribes when
/// `unsubscribe` is called or the handle is dropped.
pub struct UpstreamSubscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl UpstreamSubscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self { teardown: Some(Box::new(teardown)) }
    }

    pub fn unsubscribe(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for UpstreamSubscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

// =============================================================================
// AUTH BACKEND TRAIT
// =============================================================================

/// Client-side view of the hosted auth service: one current session plus a
/// change notification stream.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Sign in and make the new session current.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Current session, refreshed silently when it is about to expire.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Force a refresh of the current session.
    async fn refresh_session(&self) -> Result<Session, AuthError>;

    /// Revoke the current session. The local session survives a failed call.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Register for auth-state changes.
    fn on_auth_state_change(&self, callback: AuthCallback) -> UpstreamSubscription;
}

// =============================================================================
// HOSTED CLIENT
// =============================================================================

#[derive(Default)]
struct ClientState {
    session: Option<Session>,
    callbacks: Vec<(u64, AuthCallback)>,
    next_callback_id: u64,
}

pub struct HostedAuthClient {
    service: Arc<dyn AuthService>,
    state: Arc<Mutex<ClientState>>,
}

impl HostedAuthClient {
    #[must_use]
    pub fn new(service: Arc<dyn AuthService>) -> Self {
        Self { service, state: Arc::new(Mutex::new(ClientState::default())) }
    }

    /// Build a client talking to the configured auth service.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Ok(Self::new(Arc::new(AuthApi::new(config)?)))
    }

    /// Number of live `on_auth_state_change` registrations.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.lock().callbacks.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    fn store(&self, session: Option<Session>) {
        self.lock().session = session;
    }

    fn emit(&self, event: &AuthEvent) {
        let callbacks: Vec<AuthCallback> = self
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        tracing::debug!(event = %event.kind(), listeners = callbacks.len(), "auth state change");
        for callback in callbacks {
            callback(event.clone());
        }
    }

    async fn refresh_from(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let session = self.service.refresh(refresh_token).await?;
        self.store(Some(session.clone()));
        self.emit(&AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl AuthBackend for HostedAuthClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.service.sign_in_with_password(email, password).await?;
        self.store(Some(session.clone()));
        tracing::info!(user_id = %session.user.id, "signed in");
        self.emit(&AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.current() else {
            return Ok(None);
        };
        if !session.expires_within(unix_now(), EXPIRY_MARGIN_SECS) {
            return Ok(Some(session));
        }

        match self.refresh_from(&session.refresh_token).await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(e) if e.is_unauthorized() => {
                tracing::info!(error = %e, "refresh rejected, dropping session");
                self.store(None);
                self.emit(&AuthEvent::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.current().ok_or(AuthError::NoSession)?;
        self.refresh_from(&session.refresh_token).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.current() else {
            return Ok(());
        };
        self.service.sign_out(&session.access_token).await?;
        self.store(None);
        tracing::info!(user_id = %session.user.id, "signed out");
        self.emit(&AuthEvent::SignedOut);
        Ok(())
    }

    fn on_auth_state_change(&self, callback: AuthCallback) -> UpstreamSubscription {
        let (id, initial) = {
            let mut state = self.lock();
            let id = state.next_callback_id;
            state.next_callback_id += 1;
            state.callbacks.push((id, Arc::clone(&callback)));
            (id, state.session.clone())
        };

        callback(AuthEvent::InitialSession(initial));

        let state = Arc::clone(&self.state);
        UpstreamSubscription::new(move || {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .callbacks
                .retain(|(cb_id, _)| *cb_id != id);
        })
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
