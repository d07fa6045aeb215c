//! Profile store: a local cache of the signed-in user's profile row.
//!
//! The store is a pass-through cache, not a source of truth. Shape checks
//! are left to the table schema. On a failed fetch the held profile is kept
//! as last-known-good; the façade clears it whenever the signed-in identity
//! changes, which keeps the cached row tied to the current user.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::backend::ProfileTable;
use crate::error::{ProfileResult, StoreError};
use crate::models::{NewProfile, Profile, ProfileUpdate};

/// Snapshot of the profile domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileState {
    pub profile: Option<Profile>,
    pub loading: bool,
    pub error: Option<StoreError>,
}

pub struct ProfileStore {
    table: Arc<dyn ProfileTable>,
    state: watch::Sender<ProfileState>,
}

impl ProfileStore {
    #[must_use]
    pub fn new(table: Arc<dyn ProfileTable>) -> Self {
        let (state, _) = watch::channel(ProfileState::default());
        Self { table, state }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProfileState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> ProfileState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    /// Load the row for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no row exists, or the transport failure. The
    /// held profile is not cleared.
    pub async fn fetch_profile(&self, user_id: &str) -> ProfileResult<Profile> {
        self.begin();
        match self.table.select_by_id(user_id).await {
            Ok(row) => {
                debug!(%user_id, "profile fetched");
                self.store_row(&row);
                Ok(row)
            }
            Err(e) => Err(self.fail("fetch_profile", e)),
        }
    }

    /// Merge `updates` into the row for `user_id`, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns the table's error; the held profile is left unchanged.
    pub async fn update_profile(&self, user_id: &str, mut updates: ProfileUpdate) -> ProfileResult<Profile> {
        self.begin();
        let prior = self
            .state
            .borrow()
            .profile
            .as_ref()
            .filter(|p| p.id == user_id)
            .map(|p| p.updated_at);
        updates.updated_at = Some(next_stamp(OffsetDateTime::now_utc(), prior));

        match self.table.update_by_id(user_id, &updates).await {
            Ok(row) => {
                debug!(%user_id, "profile updated");
                self.store_row(&row);
                Ok(row)
            }
            Err(e) => Err(self.fail("update_profile", e)),
        }
    }

    /// Insert a new row. Duplicate ids are rejected by the table.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailure` for duplicates, or the transport failure.
    pub async fn create_profile(&self, profile: NewProfile) -> ProfileResult<Profile> {
        self.begin();
        match self.table.insert(&profile).await {
            Ok(row) => {
                debug!(user_id = %row.id, "profile created");
                self.store_row(&row);
                Ok(row)
            }
            Err(e) => Err(self.fail("create_profile", e)),
        }
    }

    /// Drop the cached row and any error.
    pub fn clear_profile(&self) {
        self.state.send_modify(|s| {
            s.profile = None;
            s.error = None;
        });
    }

    pub fn set_profile(&self, profile: Option<Profile>) {
        self.state.send_modify(|s| s.profile = profile);
    }

    fn store_row(&self, row: &Profile) {
        self.state.send_modify(|s| {
            s.profile = Some(row.clone());
            s.loading = false;
        });
    }

    fn begin(&self) {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    fn fail(&self, op: &'static str, err: StoreError) -> StoreError {
        warn!(op, kind = ?err.kind, message = %err.message, "profile action failed");
        self.state.send_modify(|s| {
            s.error = Some(err.clone());
            s.loading = false;
        });
        err
    }
}

/// Timestamp for the next write: the current time, bumped past `prior` when
/// the clock has not advanced beyond it.
/// Stamps carry microsecond precision to match the table's timestamp type.
fn next_stamp(now: OffsetDateTime, prior: Option<OffsetDateTime>) -> OffsetDateTime {
    let now = now - Duration::nanoseconds(i64::from(now.nanosecond() % 1_000));
    match prior {
        Some(prior) if now <= prior => prior + Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
