use super::*;
use crate::auth::types::AuthEvent;
use crate::auth::test_helpers::{FakeBackend, session_for};

#[test]
fn client_returns_the_injected_instance() {
    let backend = FakeBackend::new();
    let injected: Arc<dyn AuthBackend> = backend.clone();
    let store = SessionStore::new(Arc::clone(&injected));

    assert!(Arc::ptr_eq(store.client(), &injected));
    assert!(Arc::ptr_eq(store.client(), store.client()));
}

#[test]
fn connect_builds_from_config() {
    let cfg = AuthConfig::new("https://abc.supabase.co", "anon").unwrap();
    let store = SessionStore::connect(&cfg).unwrap();
    assert!(store.cached_session().is_none());
}

#[tokio::test]
async fn get_session_populates_cache() {
    let session = session_for("staff@example.com");
    let store = SessionStore::new(FakeBackend::signed_in(session.clone()));

    assert!(store.cached_session().is_none());
    let got = store.get_session().await.unwrap();
    assert_eq!(got, Some(session.clone()));
    assert_eq!(store.cached_session(), Some(session));
}

#[tokio::test]
async fn get_session_error_keeps_previous_cache() {
    let session = session_for("staff@example.com");
    let backend = FakeBackend::signed_in(session.clone());
    let store = SessionStore::new(backend.clone());
    store.get_session().await.unwrap();

    backend.fail_get_session(true);
    assert!(store.get_session().await.is_err());
    assert_eq!(store.cached_session(), Some(session));
}

#[tokio::test]
async fn sign_in_caches_session() {
    let store = SessionStore::new(FakeBackend::new());
    let session = store
        .sign_in_with_password("staff@example.com", "pw")
        .await
        .unwrap();
    assert_eq!(store.cached_session(), Some(session));
}

#[tokio::test]
async fn sign_out_clears_cache_and_closes_bus() {
    let backend = FakeBackend::signed_in(session_for("staff@example.com"));
    let store = SessionStore::new(backend.clone());
    store.get_session().await.unwrap();
    let _listener = store.bus().subscribe(|_: &AuthEvent| Ok(()));
    assert_eq!(backend.active_subscriptions(), 1);

    store.sign_out().await.unwrap();

    assert!(store.cached_session().is_none());
    assert_eq!(backend.active_subscriptions(), 0);
    assert_eq!(store.bus().listener_count(), 0);
}

#[tokio::test]
async fn failed_sign_out_keeps_local_session() {
    let session = session_for("staff@example.com");
    let backend = FakeBackend::signed_in(session.clone());
    let store = SessionStore::new(backend.clone());
    store.get_session().await.unwrap();
    let _listener = store.bus().subscribe(|_: &AuthEvent| Ok(()));

    backend.fail_sign_out(true);
    let err = store.sign_out().await.unwrap_err();

    assert!(matches!(err, AuthError::Api { status: 503, .. }));
    assert_eq!(store.cached_session(), Some(session));
    assert_eq!(backend.active_subscriptions(), 1);
    assert_eq!(store.bus().listener_count(), 1);
}
