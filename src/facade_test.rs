use super::*;
use crate::backend::memory::{MemoryBackend, MemoryOp, profile_row};
use crate::error::ErrorKind;
use crate::models::AuthEvent;
use std::time::Duration;

// =========================================================================
// RecordingSync
// =========================================================================

#[derive(Default)]
struct RecordingSync {
    events: std::sync::Mutex<Vec<String>>,
}

impl RecordingSync {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

#[async_trait::async_trait]
impl ProfileSync for RecordingSync {
    async fn load_for(&self, user_id: &str) {
        self.events.lock().unwrap().push(format!("load:{user_id}"));
    }

    fn reset(&self) {
        self.events.lock().unwrap().push("reset".into());
    }
}

/// Poll until `pred` holds or two seconds pass.
async fn eventually(pred: impl Fn() -> bool) {
    for _ in 0..200 {
        if pred() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn recording_context() -> (Arc<MemoryBackend>, Arc<RecordingSync>, AuthContext) {
    let backend = Arc::new(MemoryBackend::new());
    let sync = Arc::new(RecordingSync::default());
    let profiles = Arc::new(ProfileStore::new(backend.clone()));
    let ctx = AuthContext::assemble(backend.clone(), profiles, sync.clone());
    (backend, sync, ctx)
}

fn memory_context() -> (Arc<MemoryBackend>, AuthContext) {
    let backend = Arc::new(MemoryBackend::new());
    let ctx = AuthContext::create(backend.clone(), backend.clone());
    (backend, ctx)
}

// =========================================================================
// IdentityLink
// =========================================================================

#[tokio::test]
async fn link_null_to_user_to_null() {
    let sync = Arc::new(RecordingSync::default());
    let link = IdentityLink::new(sync.clone());

    assert!(!link.observe(None).await);
    assert!(link.observe(Some("u1")).await);
    assert!(link.observe(None).await);

    assert_eq!(sync.events(), vec!["load:u1".to_owned(), "reset".to_owned()]);
}

#[tokio::test]
async fn link_ignores_repeated_identity() {
    let sync = Arc::new(RecordingSync::default());
    let link = IdentityLink::new(sync.clone());

    link.observe(Some("u1")).await;
    assert!(!link.observe(Some("u1")).await);
    assert_eq!(sync.count("load:"), 1);
    assert_eq!(link.current().await.as_deref(), Some("u1"));
}

#[tokio::test]
async fn link_switching_users_resets_before_load() {
    let sync = Arc::new(RecordingSync::default());
    let link = IdentityLink::new(sync.clone());

    link.observe(Some("u1")).await;
    link.observe(Some("u2")).await;
    assert_eq!(sync.events(), vec!["load:u1".to_owned(), "reset".to_owned(), "load:u2".to_owned()]);
}

// =========================================================================
// Context: listener-driven sync
// =========================================================================

#[tokio::test]
async fn remote_sign_in_then_sign_out_syncs_profile_once_each() {
    let (backend, sync, ctx) = recording_context();
    ctx.mount().await.unwrap();

    let mut user = backend.add_account("u1@example.com", "hunter22");
    user.id = "u1".into();
    backend.push_change(AuthEvent::SignedIn, Some(MemoryBackend::issue_session(&user)));
    eventually(|| sync.count("load:") == 1).await;

    backend.push_change(AuthEvent::SignedOut, None);
    eventually(|| sync.count("reset") == 1).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sync.events(), vec!["load:u1".to_owned(), "reset".to_owned()]);
}

#[tokio::test]
async fn token_refresh_does_not_refetch() {
    let (backend, sync, ctx) = recording_context();
    ctx.mount().await.unwrap();

    let user = backend.add_account("ada@example.com", "hunter22");
    backend.push_change(AuthEvent::SignedIn, Some(MemoryBackend::issue_session(&user)));
    eventually(|| sync.count("load:") == 1).await;

    backend.push_change(AuthEvent::TokenRefreshed, Some(MemoryBackend::issue_session(&user)));
    let mut rx = ctx.subscribe_auth();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.borrow_and_update().session.is_some());
    assert_eq!(sync.count("load:"), 1);
}

// =========================================================================
// Context: façade actions
// =========================================================================

#[tokio::test]
async fn sign_out_clears_profile_exactly_once() {
    let (backend, sync, ctx) = recording_context();
    ctx.mount().await.unwrap();
    backend.add_account("ada@example.com", "hunter22");

    ctx.sign_in("ada@example.com", "hunter22").await.unwrap();
    ctx.sign_out().await.unwrap();
    assert!(ctx.user().is_none());
    assert!(ctx.session().is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sync.count("load:"), 1);
    assert_eq!(sync.count("reset"), 1);
}

#[tokio::test]
async fn sign_in_loads_profile_before_returning() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();
    let user = backend.add_account("ada@example.com", "hunter22");
    backend.put_row(profile_row(&user.id, "Ada"));

    ctx.sign_in("ada@example.com", "hunter22").await.unwrap();
    assert!(ctx.is_authenticated());
    assert_eq!(ctx.user_id(), Some(user.id.clone()));
    assert_eq!(ctx.profile().map(|p| p.id), Some(user.id));
    assert_eq!(backend.calls(MemoryOp::Select), 1);
}

#[tokio::test]
async fn sign_out_clears_profile_state() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();
    let user = backend.add_account("ada@example.com", "hunter22");
    backend.put_row(profile_row(&user.id, "Ada"));
    ctx.sign_in("ada@example.com", "hunter22").await.unwrap();

    ctx.sign_out().await.unwrap();
    assert!(!ctx.is_authenticated());
    assert!(ctx.profile().is_none());
}

#[tokio::test]
async fn failed_sign_out_keeps_profile() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();
    let user = backend.add_account("ada@example.com", "hunter22");
    backend.put_row(profile_row(&user.id, "Ada"));
    ctx.sign_in("ada@example.com", "hunter22").await.unwrap();
    backend.fail_next(MemoryOp::SignOut, StoreError::network("offline"));

    assert!(ctx.sign_out().await.is_err());
    assert!(ctx.profile().is_some());
}

#[tokio::test]
async fn mount_restores_session_and_profile() {
    let (backend, ctx) = memory_context();
    let user = backend.add_account("ada@example.com", "hunter22");
    backend.put_row(profile_row(&user.id, "Ada"));
    backend.push_change(AuthEvent::SignedIn, Some(MemoryBackend::issue_session(&user)));

    ctx.mount().await.unwrap();
    assert!(ctx.initialized());
    assert_eq!(ctx.profile().and_then(|p| p.full_name), Some("Ada".to_owned()));
}

#[tokio::test]
async fn mount_twice_initializes_once() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();
    ctx.mount().await.unwrap();
    assert_eq!(backend.calls(MemoryOp::GetSession), 1);
    assert_eq!(backend.listener_count(), 1);
}

#[tokio::test]
async fn dispose_releases_listener_and_sync() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();
    ctx.dispose().await;
    assert_eq!(backend.listener_count(), 0);
    assert!(!ctx.auth().listener_active());
}

// =========================================================================
// Status
// =========================================================================

#[tokio::test]
async fn status_keeps_domains_apart() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();
    backend.add_account("ada@example.com", "hunter22");

    // Signed in, but no profile row exists: only the profile domain fails.
    ctx.sign_in("ada@example.com", "hunter22").await.unwrap();
    let status = ctx.status();
    assert!(status.auth.error.is_none());
    assert_eq!(status.profile.error.as_ref().map(|e| e.kind), Some(ErrorKind::NotFound));
    let errors = status.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].domain, Domain::Profile);
    assert!(!status.any_loading());

    // A failed sign-in adds an auth error alongside.
    assert!(ctx.sign_in("ada@example.com", "wrong").await.is_err());
    let domains: Vec<_> = ctx.status().errors().into_iter().map(|e| e.domain).collect();
    assert_eq!(domains, vec![Domain::Auth, Domain::Profile]);
}

#[tokio::test]
async fn profile_proxies_reach_store() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();
    let user = backend.add_account("ada@example.com", "hunter22");
    ctx.sign_in("ada@example.com", "hunter22").await.unwrap();

    let created = ctx
        .create_user_profile(NewProfile { id: user.id.clone(), full_name: Some("Ada".into()), ..NewProfile::default() })
        .await
        .unwrap();
    let updated = ctx
        .update_user_profile(&user.id, ProfileUpdate { avatar_url: Some("a.png".into()), ..ProfileUpdate::default() })
        .await
        .unwrap();
    assert!(updated.updated_at > created.updated_at);
    assert_eq!(ctx.profile(), Some(updated));
}

#[tokio::test]
async fn profile_write_for_another_user_is_rejected() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();
    let user = backend.add_account("ada@example.com", "hunter22");
    backend.put_row(profile_row(&user.id, "Ada"));
    backend.put_row(profile_row("someone-else", "Eve"));
    ctx.sign_in("ada@example.com", "hunter22").await.unwrap();

    let err = ctx
        .update_user_profile("someone-else", ProfileUpdate { full_name: Some("Mallory".into()), ..ProfileUpdate::default() })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationFailure);
    assert_eq!(ctx.profile().map(|p| p.id), Some(user.id));
    assert_eq!(backend.calls(MemoryOp::Update), 0);
    assert_eq!(backend.row("someone-else").and_then(|p| p.full_name), Some("Eve".to_owned()));
}

#[tokio::test]
async fn profile_write_while_signed_out_is_unauthorized() {
    let (backend, ctx) = memory_context();
    ctx.mount().await.unwrap();

    let err = ctx
        .create_user_profile(NewProfile { id: "ghost".into(), ..NewProfile::default() })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unauthorized);
    assert!(ctx.profile().is_none());
    assert_eq!(backend.calls(MemoryOp::Insert), 0);
    assert!(backend.row("ghost").is_none());
}
