//! Backend platform seam.
//!
//! ARCHITECTURE
//! ============
//! Stores talk to the hosted platform only through [`AuthBackend`] and
//! [`ProfileTable`]. [`rest::RestBackend`] implements both over HTTP;
//! [`memory::MemoryBackend`] implements both in-process for tests and
//! offline runs.
//!
//! Session changes are pushed on a broadcast channel. Every call to
//! [`AuthBackend::subscribe`] hands out one receiver; dropping the receiver
//! is the deregistration.

pub mod memory;
pub mod rest;

use tokio::sync::broadcast;

use crate::error::{AuthResult, ProfileResult};
use crate::models::{AuthChange, AuthEvent, NewProfile, Profile, ProfileUpdate, Session, SignUpMetadata, User, UserAttributes};

const CHANGE_FEED_CAPACITY: usize = 16;

/// Result of a sign-up call. `session` is absent when the platform requires
/// email confirmation before issuing tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

/// Auth surface of the platform.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    /// Current session known to the platform client, if any.
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    async fn sign_up(&self, email: &str, password: &str, metadata: &SignUpMetadata) -> AuthResult<SignUpResponse>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session>;

    async fn sign_out(&self) -> AuthResult<()>;

    async fn update_user(&self, attributes: &UserAttributes) -> AuthResult<User>;

    async fn reset_password_for_email(&self, email: &str) -> AuthResult<()>;

    /// Register for session change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

/// Point access to the profile table, keyed by user id.
#[async_trait::async_trait]
pub trait ProfileTable: Send + Sync {
    async fn select_by_id(&self, id: &str) -> ProfileResult<Profile>;

    async fn update_by_id(&self, id: &str, update: &ProfileUpdate) -> ProfileResult<Profile>;

    async fn insert(&self, profile: &NewProfile) -> ProfileResult<Profile>;
}

/// Broadcast sender shared by backend implementations.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<AuthChange>,
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.tx.subscribe()
    }

    /// Publish a change. Having no listeners is not an error.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let delivered = self.tx.send(AuthChange { event, session }).unwrap_or(0);
        tracing::debug!(?event, delivered, "auth change emitted");
    }

    /// Number of live receivers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
