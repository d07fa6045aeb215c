//! Auth context: one façade over the auth, profile, and app stores.
//!
//! ARCHITECTURE
//! ============
//! `AuthContext` is created explicitly and passed to whatever presents the
//! UI; there are no global stores. It owns the causal link between auth
//! transitions and the profile lifecycle: when the signed-in identity
//! changes, the profile is fetched for the new user or cleared on sign-out.
//!
//! Transitions go through a single [`IdentityLink`], shared by the
//! background sync task (which sees listener-driven changes such as remote
//! sign-out) and the façade's own actions (which apply the transition before
//! returning). The link only acts when the identity actually changes, so a
//! transition observed by both paths runs once.
//!
//! LIFECYCLE
//! =========
//! `mount` starts the sync task and initializes auth once. `dispose` stops
//! the sync task and releases the auth listener; drop does the same without
//! waiting.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{AuthBackend, ProfileTable, SignUpResponse};
use crate::error::{AuthResult, Domain, DomainError, ProfileResult, StoreError};
use crate::models::{NewProfile, Profile, ProfileUpdate, Session, SignUpMetadata, User, UserAttributes};
use crate::store::app::AppStore;
use crate::store::auth::{AuthState, AuthStore};
use crate::store::profile::ProfileStore;

// =============================================================================
// IDENTITY LINK
// =============================================================================

/// Receiver of identity transitions.
#[async_trait::async_trait]
pub trait ProfileSync: Send + Sync {
    /// A user became signed in.
    async fn load_for(&self, user_id: &str);

    /// The signed-in user went away.
    fn reset(&self);
}

#[async_trait::async_trait]
impl ProfileSync for ProfileStore {
    async fn load_for(&self, user_id: &str) {
        // The store keeps the error for display; nothing else to do here.
        if let Err(e) = self.fetch_profile(user_id).await {
            debug!(%user_id, kind = ?e.kind, "profile sync fetch failed");
        }
    }

    fn reset(&self) {
        self.clear_profile();
    }
}

/// Tracks the last observed user id and turns changes into profile work.
pub struct IdentityLink {
    sync: Arc<dyn ProfileSync>,
    current: tokio::sync::Mutex<Option<String>>,
}

impl IdentityLink {
    #[must_use]
    pub fn new(sync: Arc<dyn ProfileSync>) -> Self {
        Self { sync, current: tokio::sync::Mutex::new(None) }
    }

    /// Apply the identity `next`. Returns false when it equals the last one.
    ///
    /// Switching directly between two users resets before loading, so a
    /// profile never outlives its user.
    pub async fn observe(&self, next: Option<&str>) -> bool {
        let mut current = self.current.lock().await;
        if current.as_deref() == next {
            return false;
        }
        let previous = std::mem::replace(&mut *current, next.map(str::to_owned));
        debug!(?previous, ?next, "identity changed");
        match next {
            Some(user_id) => {
                if previous.is_some() {
                    self.sync.reset();
                }
                self.sync.load_for(user_id).await;
            }
            None => self.sync.reset(),
        }
        true
    }

    pub async fn current(&self) -> Option<String> {
        self.current.lock().await.clone()
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Loading and error state of one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainStatus {
    pub loading: bool,
    pub error: Option<StoreError>,
}

/// Per-domain status; the domains are never merged into one flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStatus {
    pub auth: DomainStatus,
    pub profile: DomainStatus,
}

impl ContextStatus {
    #[must_use]
    pub fn any_loading(&self) -> bool {
        self.auth.loading || self.profile.loading
    }

    /// Current errors, tagged with their domain.
    #[must_use]
    pub fn errors(&self) -> Vec<DomainError> {
        [(Domain::Auth, &self.auth.error), (Domain::Profile, &self.profile.error)]
            .into_iter()
            .filter_map(|(domain, error)| error.clone().map(|error| DomainError { domain, error }))
            .collect()
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

pub struct AuthContext {
    auth: Arc<AuthStore>,
    profiles: Arc<ProfileStore>,
    app: AppStore,
    link: Arc<IdentityLink>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl AuthContext {
    #[must_use]
    pub fn create(auth_backend: Arc<dyn AuthBackend>, table: Arc<dyn ProfileTable>) -> Self {
        let profiles = Arc::new(ProfileStore::new(table));
        let sync: Arc<dyn ProfileSync> = profiles.clone();
        Self::assemble(auth_backend, profiles, sync)
    }

    fn assemble(auth_backend: Arc<dyn AuthBackend>, profiles: Arc<ProfileStore>, sync: Arc<dyn ProfileSync>) -> Self {
        Self {
            auth: Arc::new(AuthStore::new(auth_backend)),
            profiles,
            app: AppStore::new(),
            link: Arc::new(IdentityLink::new(sync)),
            sync_task: Mutex::new(None),
        }
    }

    /// Start profile sync and initialize auth if it has not been yet.
    ///
    /// # Errors
    ///
    /// Returns the initial session lookup failure. Sync keeps running.
    pub async fn mount(&self) -> AuthResult<()> {
        self.start_sync();
        if self.auth.is_initialized() {
            return Ok(());
        }
        self.auth.initialize().await?;
        self.settle().await;
        Ok(())
    }

    /// Stop profile sync and release the auth listener.
    pub async fn dispose(&self) {
        let handle = self.sync_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "profile sync ended abnormally");
                }
            }
        }
        self.auth.dispose().await;
    }

    fn start_sync(&self) {
        let mut slot = self.sync_task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        *slot = Some(spawn_sync(self.auth.subscribe(), Arc::clone(&self.link)));
    }

    /// Apply the current identity now instead of waiting for the sync task.
    async fn settle(&self) {
        let user_id = self.auth.snapshot().user_id().map(str::to_owned);
        self.link.observe(user_id.as_deref()).await;
    }

    // =========================================================================
    // STORES
    // =========================================================================

    #[must_use]
    pub fn auth(&self) -> &AuthStore {
        &self.auth
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    #[must_use]
    pub fn app(&self) -> &AppStore {
        &self.app
    }

    #[must_use]
    pub fn subscribe_auth(&self) -> watch::Receiver<AuthState> {
        self.auth.subscribe()
    }

    // =========================================================================
    // DERIVED
    // =========================================================================

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.auth.user()
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.auth.session()
    }

    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.profiles.profile()
    }

    #[must_use]
    pub fn initialized(&self) -> bool {
        self.auth.is_initialized()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth.snapshot().user.is_some()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.auth.snapshot().user_id().map(str::to_owned)
    }

    #[must_use]
    pub fn status(&self) -> ContextStatus {
        let auth = self.auth.snapshot();
        let profile = self.profiles.snapshot();
        ContextStatus {
            auth: DomainStatus { loading: auth.loading, error: auth.error },
            profile: DomainStatus { loading: profile.loading, error: profile.error },
        }
    }

    // =========================================================================
    // AUTH ACTIONS
    // =========================================================================

    /// # Errors
    ///
    /// See [`AuthStore::sign_up`].
    pub async fn sign_up(&self, email: &str, password: &str, metadata: SignUpMetadata) -> AuthResult<SignUpResponse> {
        let response = self.auth.sign_up(email, password, metadata).await?;
        self.settle().await;
        Ok(response)
    }

    /// Sign in; the profile for the new user is loaded before returning.
    ///
    /// # Errors
    ///
    /// See [`AuthStore::sign_in`].
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session> {
        let session = self.auth.sign_in(email, password).await?;
        self.settle().await;
        Ok(session)
    }

    /// Sign out; the profile is cleared before returning.
    ///
    /// # Errors
    ///
    /// See [`AuthStore::sign_out`]. The profile is kept on failure.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.auth.sign_out().await?;
        self.settle().await;
        Ok(())
    }

    /// # Errors
    ///
    /// See [`AuthStore::update_user`].
    pub async fn update_user(&self, attributes: UserAttributes) -> AuthResult<User> {
        self.auth.update_user(attributes).await
    }

    /// # Errors
    ///
    /// See [`AuthStore::reset_password`].
    pub async fn reset_password(&self, email: &str) -> AuthResult<()> {
        self.auth.reset_password(email).await
    }

    // =========================================================================
    // PROFILE ACTIONS
    // =========================================================================

    /// Update the signed-in user's profile row.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when nobody is signed in, `ValidationFailure` when
    /// `user_id` is not the signed-in user. Otherwise see
    /// [`ProfileStore::update_profile`].
    pub async fn update_user_profile(&self, user_id: &str, updates: ProfileUpdate) -> ProfileResult<Profile> {
        self.require_identity(user_id)?;
        self.profiles.update_profile(user_id, updates).await
    }

    /// Create the signed-in user's profile row.
    ///
    /// # Errors
    ///
    /// Same identity checks as [`Self::update_user_profile`]. Otherwise see
    /// [`ProfileStore::create_profile`].
    pub async fn create_user_profile(&self, profile: NewProfile) -> ProfileResult<Profile> {
        self.require_identity(&profile.id)?;
        self.profiles.create_profile(profile).await
    }

    /// The cached profile only ever holds the signed-in user's row.
    fn require_identity(&self, user_id: &str) -> ProfileResult<()> {
        match self.user_id() {
            None => Err(StoreError::unauthorized("not signed in")),
            Some(current) if current != user_id => {
                warn!(%user_id, %current, "profile write for another user rejected");
                Err(StoreError::validation("profile id does not match the signed-in user"))
            }
            Some(_) => Ok(()),
        }
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        if let Some(handle) = self.sync_task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

fn spawn_sync(mut rx: watch::Receiver<AuthState>, link: Arc<IdentityLink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let user_id = rx.borrow_and_update().user_id().map(str::to_owned);
            link.observe(user_id.as_deref()).await;
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
#[path = "facade_test.rs"]
mod tests;
