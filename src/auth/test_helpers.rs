//! In-crate fakes for the auth seams.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use super::api::AuthService;
use super::client::{AuthBackend, AuthCallback, UpstreamSubscription};
use super::guard::{LoadError, NavigationError, Navigator, PageLoader};
use super::types::{AuthError, AuthEvent, Principal, Session, unix_now};

/// A session valid for the next hour.
#[must_use]
pub fn session_for(email: &str) -> Session {
    Session {
        access_token: format!("at-{email}"),
        refresh_token: format!("rt-{email}"),
        expires_at: unix_now() + 3600,
        token_type: "bearer".into(),
        user: Principal { id: Uuid::new_v4(), email: Some(email.to_owned()) },
    }
}

// =============================================================================
// FAKE AUTH SERVICE (token-scoped REST)
// =============================================================================

/// Scripted `AuthService`. Statuses of `None` mean success.
#[derive(Default)]
pub struct FakeService {
    /// Session handed out by sign-in and refresh. `None` rejects with 400.
    pub session: Mutex<Option<Session>>,
    pub refresh_status: Mutex<Option<u16>>,
    pub sign_out_status: Mutex<Option<u16>>,
    pub refresh_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
}

impl FakeService {
    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self { session: Mutex::new(Some(session)), ..Self::default() }
    }
}

#[async_trait]
impl AuthService for FakeService {
    async fn sign_in_with_password(&self, _email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.session.lock().unwrap().clone();
        match session {
            Some(s) if password == "correct-horse" => Ok(s),
            _ => Err(AuthError::Api { status: 400, message: "Invalid login credentials".into() }),
        }
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Session, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.refresh_status.lock().unwrap() {
            return Err(AuthError::Api { status, message: "refresh failed".into() });
        }
        let mut session = self
            .session
            .lock()
            .unwrap()
            .clone()
            .ok_or(AuthError::NoSession)?;
        session.access_token = format!("{}-refreshed", session.access_token);
        session.expires_at = unix_now() + 3600;
        Ok(session)
    }

    async fn get_user(&self, access_token: &str) -> Result<Principal, AuthError> {
        let session = self.session.lock().unwrap().clone();
        match session {
            Some(s) if s.access_token == access_token => Ok(s.user),
            _ => Err(AuthError::Api { status: 401, message: "invalid JWT".into() }),
        }
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        match *self.sign_out_status.lock().unwrap() {
            Some(status) => Err(AuthError::Api { status, message: "logout failed".into() }),
            None => Ok(()),
        }
    }
}

// =============================================================================
// FAKE AUTH BACKEND (stateful client)
// =============================================================================

/// Scripted `AuthBackend` with an observable upstream subscription count.
#[derive(Default)]
pub struct FakeBackend {
    session: Mutex<Option<Session>>,
    fail_get_session: AtomicBool,
    fail_sign_out: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    callbacks: Arc<Mutex<Vec<(u64, AuthCallback)>>>,
    /// Every callback ever registered, including unsubscribed ones.
    history: Mutex<Vec<AuthCallback>>,
    next_id: AtomicU64,
    registrations: AtomicUsize,
    get_session_calls: AtomicUsize,
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn signed_in(session: Session) -> Arc<Self> {
        let backend = Self::default();
        *backend.session.lock().unwrap() = Some(session);
        Arc::new(backend)
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap() = session;
    }

    pub fn fail_get_session(&self, fail: bool) {
        self.fail_get_session.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Make the next `get_session` call wait until the returned notify fires.
    pub fn gate_next_get_session(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    /// Upstream subscriptions currently registered.
    pub fn active_subscriptions(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Upstream subscriptions ever created.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn get_session_calls(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    /// Emit to live subscriptions, as the real client does.
    pub fn emit(&self, event: &AuthEvent) {
        let callbacks: Vec<AuthCallback> = self
            .callbacks
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(event.clone());
        }
    }

    /// Emit to every callback ever registered, simulating an upstream that
    /// keeps firing after unsubscribe.
    pub fn emit_to_all(&self, event: &AuthEvent) {
        let callbacks: Vec<AuthCallback> = self.history.lock().unwrap().clone();
        for cb in callbacks {
            cb(event.clone());
        }
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn sign_in_with_password(&self, email: &str, _password: &str) -> Result<Session, AuthError> {
        let session = session_for(email);
        self.set_session(Some(session.clone()));
        self.emit(&AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_get_session.load(Ordering::SeqCst) {
            return Err(AuthError::Transport("auth backend unreachable".into()));
        }
        Ok(self.session.lock().unwrap().clone())
    }

    async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.session.lock().unwrap().clone().ok_or(AuthError::NoSession)?;
        self.emit(&AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::Api { status: 503, message: "service unavailable".into() });
        }
        self.set_session(None);
        self.emit(&AuthEvent::SignedOut);
        Ok(())
    }

    fn on_auth_state_change(&self, callback: AuthCallback) -> UpstreamSubscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().unwrap().push((id, Arc::clone(&callback)));
        self.history.lock().unwrap().push(Arc::clone(&callback));

        let initial = self.session.lock().unwrap().clone();
        callback(AuthEvent::InitialSession(initial));

        let callbacks = Arc::clone(&self.callbacks);
        UpstreamSubscription::new(move || {
            callbacks.lock().unwrap().retain(|(cb_id, _)| *cb_id != id);
        })
    }
}

// =============================================================================
// NAVIGATOR / LOADER
// =============================================================================

/// Records every navigation. The page never actually changes.
#[derive(Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    async fn navigate(&self, to: &str) -> Result<(), NavigationError> {
        self.visits.lock().unwrap().push(to.to_owned());
        if self.fail.load(Ordering::SeqCst) {
            return Err(NavigationError("router unavailable".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLoader {
    loads: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingLoader {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageLoader for RecordingLoader {
    async fn load(&self, _session: &Session) -> Result<(), LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(LoadError("records query failed".into()));
        }
        Ok(())
    }
}
