//! Auth event bus — one upstream auth-state subscription fanned out to many
//! listeners.
//!
//! DESIGN
//! ======
//! Listener policy is additive: every `subscribe` appends a listener, and
//! only the first one (after construction or `unsubscribe`) opens the
//! upstream subscription. Each upstream subscription is tagged with a
//! generation; events carrying a stale generation are dropped, so nothing
//! reaches listeners after `unsubscribe` even if the upstream keeps firing.
//!
//! Delivery goes through a drain queue. An event emitted while another is
//! being delivered (a listener signing out, say) is queued and delivered
//! after the current one finishes, in arrival order. No lock is held while a
//! listener or the upstream registration runs, so both may re-enter the bus.
//!
//! `InitialSession` without a session is filtered: on a cold load it would
//! otherwise look like a sign-out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::client::{AuthBackend, UpstreamSubscription};
use super::types::AuthEvent;

/// Error a listener reports back to the bus. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

type Listener = Arc<dyn Fn(&AuthEvent) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// =============================================================================
// SHARED STATE
// =============================================================================

enum Upstream {
    Idle,
    /// Registration with the backend in progress for this generation.
    Connecting(u64),
    Connected(UpstreamSubscription),
}

#[derive(Default)]
struct Delivery {
    draining: bool,
    queue: VecDeque<(u64, AuthEvent)>,
}

struct Shared {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    /// Generation of the live upstream subscription.
    generation: AtomicU64,
    delivery: Mutex<Delivery>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        lock(&self.listeners).iter().any(|(lid, _)| *lid == id)
    }

    fn dispatch(&self, generation: u64, event: AuthEvent) {
        if !self.is_current(generation) {
            tracing::debug!(event = %event.kind(), "dropping event from stale upstream subscription");
            return;
        }
        if matches!(event, AuthEvent::InitialSession(None)) {
            tracing::debug!("filtered INITIAL_SESSION without session");
            return;
        }

        {
            let mut delivery = lock(&self.delivery);
            delivery.queue.push_back((generation, event));
            if delivery.draining {
                return;
            }
            delivery.draining = true;
        }

        let _panic_guard = DrainGuard(self);
        loop {
            let (generation, event) = {
                let mut delivery = lock(&self.delivery);
                match delivery.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        delivery.draining = false;
                        return;
                    }
                }
            };
            if self.is_current(generation) {
                self.deliver(generation, &event);
            }
        }
    }

    fn deliver(&self, generation: u64, event: &AuthEvent) {
        let snapshot: Vec<(ListenerId, Listener)> = lock(&self.listeners)
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            // A listener may unsubscribe the bus or dispose a peer mid-delivery.
            if !self.is_current(generation) {
                return;
            }
            if !self.is_registered(id) {
                continue;
            }
            if let Err(e) = listener(event) {
                tracing::warn!(listener = id.0, event = %event.kind(), error = %e, "auth listener failed");
            }
        }
    }
}

/// Clears the draining flag when a listener panics mid-delivery.
struct DrainGuard<'a>(&'a Shared);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut delivery = lock(&self.0.delivery);
            delivery.draining = false;
            delivery.queue.clear();
        }
    }
}

// =============================================================================
// LISTENER HANDLE
// =============================================================================

/// Disposer for a single listener registration.
#[must_use = "dropping the handle keeps the listener registered; call dispose() to remove it"]
pub struct ListenerHandle {
    id: ListenerId,
    shared: Weak<Shared>,
}

impl ListenerHandle {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove this listener. The upstream subscription stays open.
    pub fn dispose(self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        // Drop the removed listener after releasing the lock; it may own
        // resources whose drop re-enters the bus.
        let removed = {
            let mut listeners = lock(&shared.listeners);
            listeners
                .iter()
                .position(|(id, _)| *id == self.id)
                .map(|idx| listeners.remove(idx))
        };
        drop(removed);
    }
}

// =============================================================================
// BUS
// =============================================================================

pub struct AuthEventBus {
    backend: Arc<dyn AuthBackend>,
    upstream: Mutex<Upstream>,
    shared: Arc<Shared>,
}

impl AuthEventBus {
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            backend,
            upstream: Mutex::new(Upstream::Idle),
            shared: Arc::new(Shared {
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                delivery: Mutex::new(Delivery::default()),
            }),
        }
    }

    /// Register a listener and make sure exactly one upstream subscription
    /// is open. Listeners receive events in registration order.
    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&AuthEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.shared.listeners).push((id, Arc::new(listener)));
        self.ensure_upstream();
        ListenerHandle { id, shared: Arc::downgrade(&self.shared) }
    }

    /// Close the upstream subscription and drop every listener.
    pub fn unsubscribe(&self) {
        let previous = {
            let mut upstream = lock(&self.upstream);
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut *upstream, Upstream::Idle)
        };
        let listeners = std::mem::take(&mut *lock(&self.shared.listeners));
        lock(&self.shared.delivery).queue.clear();
        drop(listeners);

        if let Upstream::Connected(subscription) = previous {
            subscription.unsubscribe();
            tracing::debug!("auth upstream subscription closed");
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).len()
    }

    /// Whether an upstream subscription is open or being opened.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !matches!(*lock(&self.upstream), Upstream::Idle)
    }

    fn ensure_upstream(&self) {
        let generation = {
            let mut upstream = lock(&self.upstream);
            if !matches!(*upstream, Upstream::Idle) {
                return;
            }
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *upstream = Upstream::Connecting(generation);
            generation
        };

        let shared = Arc::clone(&self.shared);
        let subscription = self
            .backend
            .on_auth_state_change(Arc::new(move |event: AuthEvent| shared.dispatch(generation, event)));

        let mut upstream = lock(&self.upstream);
        if matches!(*upstream, Upstream::Connecting(g) if g == generation) {
            *upstream = Upstream::Connected(subscription);
            tracing::debug!(generation, "auth upstream subscription opened");
        } else {
            // Torn down while registering.
            drop(upstream);
            subscription.unsubscribe();
        }
    }
}

impl Drop for AuthEventBus {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;
