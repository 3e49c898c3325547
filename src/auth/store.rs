//! Session store — the page layer's handle on the one shared auth client.
//!
//! DESIGN
//! ======
//! The composition root builds the client once and hands it in; every
//! caller of `client()` gets that same instance. The store also owns the
//! event bus for the client and a cached copy of the last session it saw.
//!
//! Sign-out clears the cache only after the service confirms; a failed
//! sign-out leaves the page believing (correctly) that it is still signed in.

use std::sync::{Arc, Mutex, PoisonError};

use super::bus::AuthEventBus;
use super::client::{AuthBackend, HostedAuthClient};
use super::types::{AuthError, Session};
use crate::config::AuthConfig;

pub struct SessionStore {
    client: Arc<dyn AuthBackend>,
    bus: Arc<AuthEventBus>,
    cached: Mutex<Option<Session>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(client: Arc<dyn AuthBackend>) -> Self {
        let bus = Arc::new(AuthEventBus::new(Arc::clone(&client)));
        Self { client, bus, cached: Mutex::new(None) }
    }

    /// Build the production client from config and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn connect(config: &AuthConfig) -> Result<Self, AuthError> {
        let client = HostedAuthClient::from_config(config)?;
        Ok(Self::new(Arc::new(client)))
    }

    /// The shared auth client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn AuthBackend> {
        &self.client
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<AuthEventBus> {
        &self.bus
    }

    /// Last session seen by this store, without I/O.
    #[must_use]
    pub fn cached_session(&self) -> Option<Session> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_cached(&self, session: Option<Session>) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Ask the client for the current session. The client may refresh the
    /// token on the way.
    ///
    /// # Errors
    ///
    /// Propagates backend failures; the cache keeps its previous value.
    pub async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let session = self.client.get_session().await?;
        self.set_cached(session.clone());
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns the backend error for rejected credentials or transport failures.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.client.sign_in_with_password(email, password).await?;
        self.set_cached(Some(session.clone()));
        Ok(session)
    }

    /// Revoke the session, then clear the cache and close the event bus.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged; local state is left as it was.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Err(e) = self.client.sign_out().await {
            tracing::warn!(error = %e, "sign-out failed, keeping local session");
            return Err(e);
        }
        self.set_cached(None);
        self.bus.unsubscribe();
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
