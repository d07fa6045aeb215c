use super::*;

// =============================================================
// AppState defaults
// =============================================================

#[test]
fn app_state_default_theme_is_system() {
    let state = AppState::default();
    assert_eq!(state.theme, Theme::System);
    assert_eq!(Theme::default(), Theme::System);
}

#[test]
fn app_state_default_flags() {
    let state = AppState::default();
    assert!(!state.navigation_ready);
    assert!(state.app_loading);
    assert!(state.online);
    assert!(state.notifications.is_empty());
}

#[test]
fn theme_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&Theme::Dark).unwrap(), "\"dark\"");
}

// =============================================================
// Setters
// =============================================================

#[test]
fn setters_update_snapshot() {
    let store = AppStore::new();
    store.set_theme(Theme::Dark);
    store.set_navigation_ready(true);
    store.set_app_loading(false);
    store.set_online(false);

    let state = store.snapshot();
    assert_eq!(state.theme, Theme::Dark);
    assert!(state.navigation_ready);
    assert!(!state.app_loading);
    assert!(!state.online);
}

// =============================================================
// Notifications
// =============================================================

#[test]
fn add_notification_assigns_unique_ids() {
    let store = AppStore::new();
    let a = store.add_notification(NotificationKind::Success, "Saved", None);
    let b = store.add_notification(NotificationKind::Error, "Failed", Some("try again"));
    assert_ne!(a, b);

    let state = store.snapshot();
    assert_eq!(state.notifications.len(), 2);
    assert_eq!(state.notifications[1].message.as_deref(), Some("try again"));
    assert!(state.notifications[0].timestamp > 0);
}

#[test]
fn remove_notification_by_id() {
    let store = AppStore::new();
    let a = store.add_notification(NotificationKind::Info, "a", None);
    let b = store.add_notification(NotificationKind::Info, "b", None);
    store.remove_notification(&a);

    let ids: Vec<_> = store.snapshot().notifications.into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![b]);
}

#[test]
fn remove_unknown_id_does_not_notify() {
    let store = AppStore::new();
    store.add_notification(NotificationKind::Info, "a", None);
    let rx = store.subscribe();
    store.remove_notification("missing");
    assert!(!rx.has_changed().unwrap());
}

#[test]
fn clear_notifications_empties_list() {
    let store = AppStore::new();
    store.add_notification(NotificationKind::Warning, "a", None);
    store.add_notification(NotificationKind::Warning, "b", None);
    store.clear_notifications();
    assert!(store.snapshot().notifications.is_empty());
}

#[tokio::test(start_paused = true)]
async fn notify_for_expires_after_ttl() {
    let store = AppStore::new();
    let id = store.notify_for(NotificationKind::Success, "Profile saved", None, Duration::from_secs(3));
    assert_eq!(store.snapshot().notifications.len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(store.snapshot().notifications.iter().any(|n| n.id == id));

    tokio::time::sleep(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert!(store.snapshot().notifications.is_empty());
}

#[test]
fn notify_for_outside_runtime_keeps_notification() {
    let store = AppStore::new();
    let id = store.notify_for(NotificationKind::Info, "Saved offline", None, Duration::from_millis(1));
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(store.snapshot().notifications.len(), 1);

    store.remove_notification(&id);
    assert!(store.snapshot().notifications.is_empty());
}
