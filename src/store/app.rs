//! App store: theme, readiness flags, connectivity, and notifications.
//!
//! Not tied to auth. Notifications are ephemeral; `notify_for` schedules
//! their removal on the current tokio runtime.

#[cfg(test)]
#[path = "app_test.rs"]
mod app_test;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

/// App-wide UI state: theme, readiness flags, connectivity, and toasts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppState {
    pub theme: Theme,
    pub navigation_ready: bool,
    pub app_loading: bool,
    pub online: bool,
    pub notifications: Vec<Notification>,
}

impl Default for AppState {
    fn default() -> Self {
        Self { theme: Theme::System, navigation_ready: false, app_loading: true, online: true, notifications: Vec::new() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

/// An ephemeral toast. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: Option<String>,
    /// Creation time in unix milliseconds.
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct AppStore {
    state: Arc<watch::Sender<AppState>>,
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStore {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(AppState::default());
        Self { state: Arc::new(state) }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> AppState {
        self.state.borrow().clone()
    }

    pub fn set_theme(&self, theme: Theme) {
        self.state.send_modify(|s| s.theme = theme);
    }

    pub fn set_navigation_ready(&self, ready: bool) {
        self.state.send_modify(|s| s.navigation_ready = ready);
    }

    pub fn set_app_loading(&self, loading: bool) {
        self.state.send_modify(|s| s.app_loading = loading);
    }

    pub fn set_online(&self, online: bool) {
        self.state.send_modify(|s| s.online = online);
    }

    /// Append a notification and return its id.
    pub fn add_notification(&self, kind: NotificationKind, title: &str, message: Option<&str>) -> String {
        let notification = Notification {
            id: Uuid::new_v4().simple().to_string(),
            kind,
            title: title.to_owned(),
            message: message.map(str::to_owned),
            timestamp: unix_millis(),
        };
        let id = notification.id.clone();
        self.state.send_modify(|s| s.notifications.push(notification));
        id
    }

    /// Append a notification that removes itself after `ttl`.
    ///
    /// Outside a tokio runtime the notification is added but never expires;
    /// remove it with [`Self::remove_notification`].
    pub fn notify_for(&self, kind: NotificationKind, title: &str, message: Option<&str>, ttl: Duration) -> String {
        let id = self.add_notification(kind, title, message);
        let Ok(runtime) = Handle::try_current() else {
            warn!(%id, "no tokio runtime; notification will not expire");
            return id;
        };
        let store = self.clone();
        let expiring = id.clone();
        // Detached: removal of an already-removed id is a no-op.
        runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            store.remove_notification(&expiring);
        });
        id
    }

    /// Remove a notification by id. Unknown ids are ignored.
    pub fn remove_notification(&self, id: &str) {
        self.state.send_if_modified(|s| {
            let before = s.notifications.len();
            s.notifications.retain(|n| n.id != id);
            s.notifications.len() != before
        });
    }

    pub fn clear_notifications(&self) {
        self.state.send_modify(|s| s.notifications.clear());
    }
}

fn unix_millis() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
