//! In-process backend with the same observable behavior as the platform.
//!
//! Accounts, the current session, and profile rows live behind one mutex.
//! Every call is counted per [`MemoryOp`], and a failure can be queued for
//! the next call of a given op. Used by the test suites and the CLI's
//! `--offline` mode.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use time::{Duration, OffsetDateTime};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{AuthBackend, ChangeFeed, ProfileTable, SignUpResponse};
use crate::error::{AuthResult, ProfileResult, StoreError};
use crate::models::{
    AuthChange, AuthEvent, NewProfile, Profile, ProfileUpdate, Session, SignUpMetadata, User, UserAttributes,
};

const SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    GetSession,
    SignUp,
    SignIn,
    SignOut,
    UpdateUser,
    ResetPassword,
    Select,
    Update,
    Insert,
}

struct Account {
    password: String,
    user: User,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    rows: HashMap<String, Profile>,
    calls: HashMap<MemoryOp, usize>,
    failures: HashMap<MemoryOp, StoreError>,
    reset_requests: Vec<String>,
}

#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    feed: ChangeFeed,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and pop a queued failure for `op`, if any.
    fn enter(&self, op: MemoryOp) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        match inner.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(inner),
        }
    }

    /// Register an account that can sign in. Returns the new user.
    pub fn add_account(&self, email: &str, password: &str) -> User {
        let user = new_user(email, serde_json::Map::new());
        self.lock()
            .accounts
            .insert(email.to_owned(), Account { password: password.to_owned(), user: user.clone() });
        user
    }

    /// Insert or replace a profile row directly.
    pub fn put_row(&self, profile: Profile) {
        self.lock().rows.insert(profile.id.clone(), profile);
    }

    #[must_use]
    pub fn row(&self, id: &str) -> Option<Profile> {
        self.lock().rows.get(id).cloned()
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: MemoryOp, err: StoreError) {
        self.lock().failures.insert(op, err);
    }

    #[must_use]
    pub fn calls(&self, op: MemoryOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn reset_requests(&self) -> Vec<String> {
        self.lock().reset_requests.clone()
    }

    /// Number of live change listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.feed.listener_count()
    }

    /// Simulate a change pushed by the platform (sign-in on another device,
    /// token refresh, remote revocation).
    pub fn push_change(&self, event: AuthEvent, session: Option<Session>) {
        self.lock().session = session.clone();
        self.feed.emit(event, session);
    }

    /// Issue a fresh session for `user` without emitting a change.
    #[must_use]
    pub fn issue_session(user: &User) -> Session {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Session {
            access_token: format!("access-{}", Uuid::new_v4().simple()),
            refresh_token: format!("refresh-{}", Uuid::new_v4().simple()),
            token_type: "bearer".to_owned(),
            expires_in: Some(SESSION_TTL_SECS),
            expires_at: Some(now + SESSION_TTL_SECS),
            user: user.clone(),
        }
    }
}

fn new_user(email: &str, user_metadata: serde_json::Map<String, serde_json::Value>) -> User {
    let now = OffsetDateTime::now_utc();
    User {
        id: Uuid::new_v4().to_string(),
        email: Some(email.to_owned()),
        user_metadata,
        created_at: Some(now),
        updated_at: Some(now),
    }
}

#[async_trait::async_trait]
impl AuthBackend for MemoryBackend {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        let inner = self.enter(MemoryOp::GetSession)?;
        Ok(inner.session.clone())
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: &SignUpMetadata) -> AuthResult<SignUpResponse> {
        let session = {
            let mut inner = self.enter(MemoryOp::SignUp)?;
            if !email.contains('@') {
                return Err(StoreError::validation("Unable to validate email address: invalid format"));
            }
            if password.len() < 6 {
                return Err(StoreError::validation("Password should be at least 6 characters"));
            }
            if inner.accounts.contains_key(email) {
                return Err(StoreError::validation("User already registered"));
            }
            let meta = match serde_json::to_value(metadata) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            let user = new_user(email, meta);
            inner
                .accounts
                .insert(email.to_owned(), Account { password: password.to_owned(), user: user.clone() });
            let session = Self::issue_session(&user);
            inner.session = Some(session.clone());
            session
        };
        self.feed.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(SignUpResponse { user: Some(session.user.clone()), session: Some(session) })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let session = {
            let mut inner = self.enter(MemoryOp::SignIn)?;
            let user = match inner.accounts.get(email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(StoreError::unauthorized("Invalid login credentials")),
            };
            let session = Self::issue_session(&user);
            inner.session = Some(session.clone());
            session
        };
        self.feed.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        {
            let mut inner = self.enter(MemoryOp::SignOut)?;
            inner.session = None;
        }
        self.feed.emit(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn update_user(&self, attributes: &UserAttributes) -> AuthResult<User> {
        let (user, session) = {
            let mut inner = self.enter(MemoryOp::UpdateUser)?;
            let Some(mut session) = inner.session.clone() else {
                return Err(StoreError::unauthorized("not signed in"));
            };
            let mut user = session.user.clone();
            if let Some(full_name) = &attributes.full_name {
                user.user_metadata.insert("full_name".into(), full_name.clone().into());
            }
            if let Some(avatar_url) = &attributes.avatar_url {
                user.user_metadata.insert("avatar_url".into(), avatar_url.clone().into());
            }
            user.updated_at = Some(OffsetDateTime::now_utc());
            if let Some(email) = user.email.clone() {
                if let Some(account) = inner.accounts.get_mut(&email) {
                    account.user = user.clone();
                }
            }
            session.user = user.clone();
            inner.session = Some(session.clone());
            (user, session)
        };
        self.feed.emit(AuthEvent::UserUpdated, Some(session));
        Ok(user)
    }

    async fn reset_password_for_email(&self, email: &str) -> AuthResult<()> {
        let mut inner = self.enter(MemoryOp::ResetPassword)?;
        if !email.contains('@') {
            return Err(StoreError::validation("Unable to validate email address: invalid format"));
        }
        inner.reset_requests.push(email.to_owned());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.feed.subscribe()
    }
}

#[async_trait::async_trait]
impl ProfileTable for MemoryBackend {
    async fn select_by_id(&self, id: &str) -> ProfileResult<Profile> {
        let inner = self.enter(MemoryOp::Select)?;
        inner
            .rows
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("no profile row with id {id}")))
    }

    async fn update_by_id(&self, id: &str, update: &ProfileUpdate) -> ProfileResult<Profile> {
        let mut inner = self.enter(MemoryOp::Update)?;
        let Some(row) = inner.rows.get_mut(id) else {
            return Err(StoreError::not_found(format!("no profile row with id {id}")));
        };
        update.apply_to(row);
        if update.updated_at.is_none() {
            row.updated_at = OffsetDateTime::now_utc();
        }
        Ok(row.clone())
    }

    async fn insert(&self, profile: &NewProfile) -> ProfileResult<Profile> {
        let mut inner = self.enter(MemoryOp::Insert)?;
        if inner.rows.contains_key(&profile.id) {
            return Err(StoreError::validation(format!(
                "duplicate key value violates unique constraint (id={})",
                profile.id
            )));
        }
        let now = OffsetDateTime::now_utc();
        let row = Profile {
            id: profile.id.clone(),
            email: profile.email.clone(),
            full_name: profile.full_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(row.id.clone(), row.clone());
        Ok(row)
    }
}

/// Profile row fixture with fixed timestamps an hour in the past.
#[must_use]
pub fn profile_row(id: &str, full_name: &str) -> Profile {
    let at = OffsetDateTime::now_utc() - Duration::hours(1);
    Profile {
        id: id.to_owned(),
        email: Some(format!("{id}@example.com")),
        full_name: Some(full_name.to_owned()),
        avatar_url: None,
        created_at: at,
        updated_at: at,
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
