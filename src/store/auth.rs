//! Auth session store.
//!
//! ARCHITECTURE
//! ============
//! Mirrors the platform's session and user. Actions proxy one remote call
//! each and follow the same discipline: mark loading and clear the error,
//! call the backend, then either store the error or apply the result.
//!
//! LIFECYCLE
//! =========
//! `initialize` subscribes to the platform's change channel exactly once and
//! spawns a listener task that overwrites session/user on every change. The
//! task handle is owned by the store; `dispose` (or drop) aborts it, which
//! drops the broadcast receiver and deregisters the listener.
//!
//! The listener is attached before the initial lookup. It bumps a change
//! counter on every event it applies; the lookup result is only written when
//! the counter has not moved, so a change racing the lookup wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{AuthBackend, SignUpResponse};
use crate::error::{AuthResult, StoreError};
use crate::models::{AuthChange, Session, SignUpMetadata, User, UserAttributes};

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

/// Snapshot of the auth domain.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub session: Option<Session>,
    pub user: Option<User>,
    pub loading: bool,
    /// Set once the first session lookup has finished, successfully or not.
    pub initialized: bool,
    pub error: Option<StoreError>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self { session: None, user: None, loading: true, initialized: false, error: None }
    }
}

impl AuthState {
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}

pub struct AuthStore {
    backend: Arc<dyn AuthBackend>,
    state: Arc<watch::Sender<AuthState>>,
    /// Guards `initialize`; true once an initialization has been attempted.
    init: tokio::sync::Mutex<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Count of listener-applied changes.
    changes: Arc<AtomicU64>,
}

impl AuthStore {
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            backend,
            state: Arc::new(state),
            init: tokio::sync::Mutex::new(false),
            listener: Mutex::new(None),
            changes: Arc::new(AtomicU64::new(0)),
        }
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    /// True while the change listener task is registered and running.
    #[must_use]
    pub fn listener_active(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Look up any existing session and start listening for changes.
    ///
    /// Only the first call does work; concurrent callers wait for it and
    /// later calls return immediately. `initialized` is set even when the
    /// lookup fails.
    ///
    /// # Errors
    ///
    /// Returns the session lookup failure from the first call.
    pub async fn initialize(&self) -> AuthResult<()> {
        let mut attempted = self.init.lock().await;
        if *attempted {
            return Ok(());
        }
        *attempted = true;

        self.attach_listener();
        self.begin();
        let seen = self.changes.load(Ordering::Acquire);
        match self.backend.get_session().await {
            Ok(session) => {
                let signed_in = session.is_some();
                let mut superseded = false;
                // Checked under the state lock; the listener bumps before it writes.
                self.state.send_modify(|s| {
                    superseded = self.changes.load(Ordering::Acquire) != seen;
                    if !superseded {
                        s.user = session.as_ref().map(|x| x.user.clone());
                        s.session = session;
                    }
                    s.loading = false;
                    s.initialized = true;
                });
                info!(signed_in, superseded, "auth initialized");
                Ok(())
            }
            Err(e) => {
                let err = self.fail("initialize", e);
                self.state.send_modify(|s| s.initialized = true);
                Err(err)
            }
        }
    }

    /// Stop the change listener. Waits until the task has been torn down.
    pub async fn dispose(&self) {
        let handle = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "auth listener ended abnormally");
                }
            }
            debug!("auth listener released");
        }
    }

    fn attach_listener(&self) {
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let rx = self.backend.subscribe();
        *slot = Some(spawn_listener(Arc::clone(&self.state), Arc::clone(&self.changes), rx));
        debug!("auth listener registered");
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Register a new account.
    ///
    /// When the platform issues a session immediately, session and user are
    /// replaced. When it requires email confirmation, state is left as is and
    /// the pending user is only returned.
    ///
    /// # Errors
    ///
    /// Returns the platform's error; session/user are left unchanged.
    pub async fn sign_up(&self, email: &str, password: &str, metadata: SignUpMetadata) -> AuthResult<SignUpResponse> {
        self.begin();
        match self.backend.sign_up(email, password, &metadata).await {
            Ok(response) => {
                self.state.send_modify(|s| {
                    if let Some(session) = &response.session {
                        s.user = Some(session.user.clone());
                        s.session = Some(session.clone());
                    }
                    s.loading = false;
                });
                info!(confirmed = response.session.is_some(), "signed up");
                Ok(response)
            }
            Err(e) => Err(self.fail("sign_up", e)),
        }
    }

    /// # Errors
    ///
    /// Returns the platform's error; session/user are left unchanged.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session> {
        self.begin();
        match self.backend.sign_in_with_password(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user.id, "signed in");
                self.state.send_modify(|s| {
                    s.user = Some(session.user.clone());
                    s.session = Some(session.clone());
                    s.loading = false;
                });
                Ok(session)
            }
            Err(e) => Err(self.fail("sign_in", e)),
        }
    }

    /// # Errors
    ///
    /// Returns the platform's error; session/user are left unchanged.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.begin();
        match self.backend.sign_out().await {
            Ok(()) => {
                info!("signed out");
                self.state.send_modify(|s| {
                    s.session = None;
                    s.user = None;
                    s.loading = false;
                });
                Ok(())
            }
            Err(e) => Err(self.fail("sign_out", e)),
        }
    }

    /// Update the auth user's metadata (display name, avatar).
    ///
    /// # Errors
    ///
    /// Returns the platform's error; the cached user is left unchanged.
    pub async fn update_user(&self, attributes: UserAttributes) -> AuthResult<User> {
        self.begin();
        match self.backend.update_user(&attributes).await {
            Ok(user) => {
                self.state.send_modify(|s| {
                    if let Some(session) = s.session.as_mut() {
                        session.user = user.clone();
                    }
                    s.user = Some(user.clone());
                    s.loading = false;
                });
                Ok(user)
            }
            Err(e) => Err(self.fail("update_user", e)),
        }
    }

    /// # Errors
    ///
    /// Returns the platform's error.
    pub async fn reset_password(&self, email: &str) -> AuthResult<()> {
        self.begin();
        match self.backend.reset_password_for_email(email).await {
            Ok(()) => {
                self.state.send_modify(|s| s.loading = false);
                Ok(())
            }
            Err(e) => Err(self.fail("reset_password", e)),
        }
    }

    // =========================================================================
    // SETTERS
    // =========================================================================

    pub fn set_user(&self, user: Option<User>) {
        self.state.send_modify(|s| s.user = user);
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.state.send_modify(|s| s.session = session);
    }

    pub fn set_loading(&self, loading: bool) {
        self.state.send_modify(|s| s.loading = loading);
    }

    pub fn set_error(&self, error: Option<StoreError>) {
        self.state.send_modify(|s| s.error = error);
    }

    fn begin(&self) {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    fn fail(&self, op: &'static str, err: StoreError) -> StoreError {
        warn!(op, kind = ?err.kind, message = %err.message, "auth action failed");
        self.state.send_modify(|s| {
            s.error = Some(err.clone());
            s.loading = false;
        });
        err
    }
}

impl Drop for AuthStore {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

fn spawn_listener(
    state: Arc<watch::Sender<AuthState>>,
    changes: Arc<AtomicU64>,
    mut rx: broadcast::Receiver<AuthChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    debug!(event = ?change.event, signed_in = change.session.is_some(), "auth change received");
                    changes.fetch_add(1, Ordering::AcqRel);
                    state.send_modify(|s| {
                        s.user = change.session.as_ref().map(|x| x.user.clone());
                        s.session = change.session;
                    });
                }
                // Later events carry the full session, so skipped ones are not replayed.
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "auth listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
