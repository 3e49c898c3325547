//! Session guard — page-entry auth check and redirect state machine.
//!
//! DESIGN
//! ======
//! ```text
//! Checking ──none──▶ Unauthenticated (navigated to login unless already there)
//!    │
//!    ├──session, protected view──▶ Authenticated ──load──▶ Idle
//!    └──session, login view─────▶ Redirecting{n} ──bound hit──▶ Failed
//! ```
//! `SIGNED_IN` (or `INITIAL_SESSION` with a session) on the login view
//! re-enters the redirect flow; `SIGNED_OUT` on a protected view sends the
//! user back to login.
//!
//! The redirect flow re-validates the session before every attempt so a
//! stale event never navigates. Attempts are counted per guard instance and
//! bounded; the counter only resets through `retry()`. When navigation
//! succeeds the host unmounts the page, which ends the loop.
//!
//! A mounted guard has one pump task. Bus events and `retry()` requests go
//! through the same channel, so at most one check or redirect loop runs at a
//! time. `retry()` only acts from `Failed`.
//!
//! Every state mutation and navigation first checks the `Liveness` token, so
//! a session check or redirect that resolves after `unmount()` is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::bus::{ListenerError, ListenerHandle};
use super::store::SessionStore;
use super::types::{AuthEvent, AuthEventKind, Session};
use crate::config::RoutePolicy;
use crate::middleware::{is_login_path, login_location, safe_redirect_target};

pub const DEFAULT_REDIRECT_RETRY_DELAY: Duration = Duration::from_millis(500);

// =============================================================================
// COLLABORATORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("navigation failed: {0}")]
pub struct NavigationError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("page data load failed: {0}")]
pub struct LoadError(pub String);

/// Client-side router.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, to: &str) -> Result<(), NavigationError>;
}

/// Loads the data a protected page shows once the session is confirmed.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, session: &Session) -> Result<(), LoadError>;
}

// =============================================================================
// STATE
// =============================================================================

/// User-visible failure with a single recovery action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardFailure {
    #[error("Could not check your session: {0}")]
    SessionCheck(String),
    #[error("Could not load this page: {0}")]
    PageLoad(String),
    #[error("Redirect failed after {attempts} attempts. Please refresh the page.")]
    RedirectExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Retry,
    Reload,
}

impl GuardFailure {
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    #[must_use]
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::SessionCheck(_) | Self::PageLoad(_) => Recovery::Retry,
            Self::RedirectExhausted { .. } => Recovery::Reload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    Checking,
    Authenticated,
    Unauthenticated,
    Redirecting { attempt: u32 },
    Idle,
    Failed(GuardFailure),
}

/// Cancellation token shared with every async continuation of one guard.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Path of the page this guard protects.
    pub current_path: String,
    pub policy: RoutePolicy,
    /// Post-login target requested through the login URL, if any.
    pub redirect_to: Option<String>,
    pub max_redirect_attempts: u32,
    pub redirect_retry_delay: Duration,
}

impl GuardConfig {
    /// Guard for `current_path`; the redirect bound comes from the policy.
    #[must_use]
    pub fn new(current_path: impl Into<String>, policy: RoutePolicy) -> Self {
        Self {
            current_path: current_path.into(),
            max_redirect_attempts: policy.max_redirect_attempts.max(1),
            policy,
            redirect_to: None,
            redirect_retry_delay: DEFAULT_REDIRECT_RETRY_DELAY,
        }
    }

    #[must_use]
    pub fn with_redirect_to(mut self, target: Option<String>) -> Self {
        self.redirect_to = target;
        self
    }

    #[must_use]
    pub fn with_max_redirect_attempts(mut self, max: u32) -> Self {
        self.max_redirect_attempts = max.max(1);
        self
    }

    #[must_use]
    pub fn with_redirect_retry_delay(mut self, delay: Duration) -> Self {
        self.redirect_retry_delay = delay;
        self
    }

    fn on_login_view(&self) -> bool {
        is_login_path(&self.current_path, &self.policy.login_path)
    }

    fn destination(&self) -> String {
        safe_redirect_target(self.redirect_to.as_deref(), &self.policy.destination)
    }
}

// =============================================================================
// GUARD
// =============================================================================

/// Work handed to the pump task of a mounted guard.
enum PumpMsg {
    Event(AuthEvent),
    Retry,
}

struct GuardInner {
    state: GuardState,
    attempts: u32,
    registration: Option<ListenerHandle>,
    /// Weak so the channel closes once the bus listener is disposed.
    pump: Option<mpsc::WeakUnboundedSender<PumpMsg>>,
}

pub struct SessionGuard {
    store: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    loader: Arc<dyn PageLoader>,
    config: GuardConfig,
    liveness: Liveness,
    inner: Mutex<GuardInner>,
}

impl SessionGuard {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        loader: Arc<dyn PageLoader>,
        config: GuardConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            navigator,
            loader,
            config,
            liveness: Liveness::new(),
            inner: Mutex::new(GuardInner {
                state: GuardState::Checking,
                attempts: 0,
                registration: None,
                pump: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, GuardInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> GuardState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Register with the event bus and start the pump task. The task runs
    /// the initial session check, then handles bus events one at a time in
    /// arrival order, along with `retry()` requests. It ends once the guard
    /// is unmounted.
    pub fn mount(self: &Arc<Self>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PumpMsg>();
        let pump = tx.downgrade();
        let registration = self.store.bus().subscribe(move |event: &AuthEvent| {
            tx.send(PumpMsg::Event(event.clone()))
                .map_err(|_| ListenerError("session guard is gone".into()))
        });
        {
            let mut inner = self.lock();
            inner.registration = Some(registration);
            inner.pump = Some(pump);
        }

        let guard = Arc::clone(self);
        tokio::spawn(async move {
            guard.check().await;
            while let Some(msg) = rx.recv().await {
                if !guard.liveness.is_alive() {
                    break;
                }
                match msg {
                    PumpMsg::Event(event) => guard.handle_event(event).await,
                    PumpMsg::Retry => guard.run_retry().await,
                }
            }
        })
    }

    /// Tear down: stop reacting to events and discard in-flight work.
    pub fn unmount(&self) {
        self.liveness.cancel();
        let registration = {
            let mut inner = self.lock();
            inner.pump = None;
            inner.registration.take()
        };
        if let Some(registration) = registration {
            registration.dispose();
        }
        tracing::debug!(path = %self.config.current_path, "session guard unmounted");
    }

    /// User recovery action from `Failed`: reset the redirect counter and
    /// check again. On a mounted guard the request is queued behind whatever
    /// the pump is running; in any other state it is ignored.
    pub async fn retry(&self) {
        if !self.liveness.is_alive() {
            return;
        }
        if !self.is_failed() {
            tracing::debug!(state = ?self.state(), "retry ignored, guard has not failed");
            return;
        }
        let pump = self.lock().pump.as_ref().and_then(mpsc::WeakUnboundedSender::upgrade);
        if let Some(pump) = pump
            && pump.send(PumpMsg::Retry).is_ok()
        {
            return;
        }
        self.run_retry().await;
    }

    async fn run_retry(&self) {
        {
            let mut inner = self.lock();
            if !matches!(inner.state, GuardState::Failed(_)) {
                return;
            }
            inner.attempts = 0;
        }
        self.check().await;
    }

    fn is_failed(&self) -> bool {
        matches!(self.lock().state, GuardState::Failed(_))
    }

    /// Set the state unless the guard has been torn down.
    fn transition(&self, next: GuardState) -> bool {
        if !self.liveness.is_alive() {
            tracing::debug!(to = ?next, "discarding transition after unmount");
            return false;
        }
        let mut inner = self.lock();
        tracing::debug!(from = ?inner.state, to = ?next, "session guard transition");
        inner.state = next;
        true
    }

    fn fail(&self, failure: GuardFailure) {
        tracing::warn!(path = %self.config.current_path, error = %failure, "session guard failed");
        self.transition(GuardState::Failed(failure));
    }

    async fn navigate(&self, to: &str) {
        if !self.liveness.is_alive() {
            return;
        }
        if let Err(e) = self.navigator.navigate(to).await {
            tracing::warn!(to, error = %e, "navigation failed");
        }
    }

    /// Initial session check, also used by `retry()`.
    pub async fn check(&self) {
        if !self.transition(GuardState::Checking) {
            return;
        }
        let liveness = self.liveness.clone();
        let result = self.store.get_session().await;
        if !liveness.is_alive() {
            tracing::debug!(path = %self.config.current_path, "discarding session check after unmount");
            return;
        }

        match result {
            Err(e) => self.fail(GuardFailure::SessionCheck(e.to_string())),
            Ok(None) if self.config.on_login_view() => {
                self.transition(GuardState::Unauthenticated);
            }
            Ok(None) => self.redirect_to_login().await,
            Ok(Some(_)) if self.config.on_login_view() => self.redirect_to_destination().await,
            Ok(Some(session)) => self.load_page(&session).await,
        }
    }

    /// React to one auth event.
    pub async fn handle_event(&self, event: AuthEvent) {
        if !self.liveness.is_alive() {
            return;
        }
        let state = self.state();
        if let GuardState::Failed(_) = state {
            tracing::debug!(event = %event.kind(), "guard failed, ignoring event until retry");
            return;
        }

        let has_session = event.session().is_some();
        let on_login = self.config.on_login_view();
        match event.kind() {
            AuthEventKind::SignedIn | AuthEventKind::InitialSession if has_session && on_login => {
                self.redirect_to_destination().await;
            }
            AuthEventKind::SignedIn if !on_login && state == GuardState::Unauthenticated => {
                self.check().await;
            }
            AuthEventKind::SignedOut if !on_login => self.redirect_to_login().await,
            kind => tracing::debug!(event = %kind, ?state, "no transition"),
        }
    }

    async fn redirect_to_login(&self) {
        if !self.transition(GuardState::Unauthenticated) {
            return;
        }
        let location = login_location(&self.config.policy.login_path, &self.config.current_path);
        tracing::info!(from = %self.config.current_path, to = %location, "no session, redirecting to login");
        self.navigate(&location).await;
    }

    async fn load_page(&self, session: &Session) {
        if !self.transition(GuardState::Authenticated) {
            return;
        }
        let result = self.loader.load(session).await;
        if !self.liveness.is_alive() {
            return;
        }
        match result {
            Ok(()) => {
                self.transition(GuardState::Idle);
            }
            Err(e) => self.fail(GuardFailure::PageLoad(e.0)),
        }
    }

    async fn redirect_to_destination(&self) {
        let destination = self.config.destination();
        let max = self.config.max_redirect_attempts;
        loop {
            if !self.liveness.is_alive() {
                return;
            }
            let attempts = self.attempts();
            if attempts >= max {
                self.fail(GuardFailure::RedirectExhausted { attempts });
                return;
            }

            // Re-validate: the event that got us here may be stale.
            match self.store.get_session().await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!("session gone before redirect, staying on login");
                    self.transition(GuardState::Unauthenticated);
                    return;
                }
                Err(e) => {
                    if self.liveness.is_alive() {
                        self.fail(GuardFailure::SessionCheck(e.to_string()));
                    }
                    return;
                }
            }

            let attempt = {
                if !self.liveness.is_alive() {
                    return;
                }
                let mut inner = self.lock();
                inner.attempts += 1;
                inner.attempts
            };
            if !self.transition(GuardState::Redirecting { attempt }) {
                return;
            }
            tracing::info!(to = %destination, attempt, max, "session present, redirecting");
            self.navigate(&destination).await;

            // Still mounted after the delay means the navigation did not land.
            if self.config.redirect_retry_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.config.redirect_retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
