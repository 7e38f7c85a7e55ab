//! End-to-end tests for the nightly policy sweeps against a real store.

use std::sync::Arc;

use chrono::Local;
use serde_json::Value;

use mentord::hub::Hub;
use mentord::policy::{PolicyEngine, REMINDER_KIND};
use mentord::store::{DataStore, ReportStatus, SqliteStore, User, UserStatus};

const DAY: i64 = 86_400;

fn active(id: &str) -> User {
    User {
        id: id.to_string(),
        status: UserStatus::Active,
        suspended_at: None,
    }
}

fn suspended(id: &str, at: i64) -> User {
    User {
        id: id.to_string(),
        status: UserStatus::Suspended,
        suspended_at: Some(at),
    }
}

fn engine_with(store: Arc<SqliteStore>, hub: Hub) -> PolicyEngine {
    PolicyEngine::new(store, hub, 7)
}

#[tokio::test]
async fn reminder_sweep_targets_exactly_the_non_reporting_users() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = Local::now().timestamp();
    for id in ["a", "b", "c", "d", "e"] {
        store.insert_user(&active(id)).unwrap();
    }
    // Two of the five filed a report today.
    store.insert_report("a", ReportStatus::Pending, now).unwrap();
    store.insert_report("b", ReportStatus::Approved, now).unwrap();

    let hub = Hub::new();
    let engine = engine_with(store.clone(), hub.clone());
    let created = engine.reminder_sweep().unwrap();
    assert_eq!(created, 3);

    for id in ["c", "d", "e"] {
        let notifications = store.notifications_for(id).unwrap();
        assert_eq!(notifications.len(), 1, "user {id}");
        assert_eq!(notifications[0].kind, REMINDER_KIND);
        assert!(notifications[0].read_at.is_none());
    }
    for id in ["a", "b"] {
        assert!(store.notifications_for(id).unwrap().is_empty(), "user {id}");
    }
}

#[tokio::test]
async fn reminder_sweep_pushes_to_the_users_realtime_room() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.insert_user(&active("carol")).unwrap();

    let hub = Hub::new();
    let (conn, mut rx) = hub.register();
    hub.subscribe(conn, "user:carol");

    let engine = engine_with(store, hub);
    engine.reminder_sweep().unwrap();

    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["kind"], "REMINDER");
}

#[tokio::test]
async fn reminder_sweep_skips_suspended_users_and_idles_on_empty_sets() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = Local::now().timestamp();
    store.insert_user(&suspended("s", now - DAY)).unwrap();

    let engine = engine_with(store.clone(), Hub::new());
    assert_eq!(engine.reminder_sweep().unwrap(), 0);
    assert!(store.notifications_for("s").unwrap().is_empty());
}

#[tokio::test]
async fn old_suspensions_are_reactivated_and_recent_ones_kept() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = Local::now().timestamp();
    store.insert_user(&suspended("old", now - 8 * DAY)).unwrap();
    store.insert_user(&suspended("recent", now - 5 * DAY)).unwrap();

    let engine = engine_with(store.clone(), Hub::new());
    let (reactivated, suspended_count) = engine.suspension_sweep().unwrap();
    assert_eq!(reactivated, 1);
    assert_eq!(suspended_count, 0);

    let old = store.user("old").unwrap().unwrap();
    assert_eq!(old.status, UserStatus::Active);
    assert_eq!(old.suspended_at, None);

    let recent = store.user("recent").unwrap().unwrap();
    assert_eq!(recent.status, UserStatus::Suspended);
    assert_eq!(recent.suspended_at, Some(now - 5 * DAY));
}

#[tokio::test]
async fn reactivation_ignores_the_suspension_reason() {
    // Suspended manually (no stale report anywhere): still reactivated
    // once the suspension is older than the configured duration.
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = Local::now().timestamp();
    store.insert_user(&suspended("manual", now - 30 * DAY)).unwrap();

    let engine = engine_with(store.clone(), Hub::new());
    engine.suspension_sweep().unwrap();
    assert_eq!(
        store.user("manual").unwrap().unwrap().status,
        UserStatus::Active
    );
}

#[tokio::test]
async fn stale_pending_reports_suspend_their_owner() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = Local::now().timestamp();
    store.insert_user(&active("stale")).unwrap();
    store.insert_user(&active("fresh")).unwrap();
    store
        .insert_report("stale", ReportStatus::Pending, now - 31 * DAY)
        .unwrap();
    store
        .insert_report("fresh", ReportStatus::Pending, now - 29 * DAY)
        .unwrap();

    let engine = engine_with(store.clone(), Hub::new());
    let (_, suspended_count) = engine.suspension_sweep().unwrap();
    assert_eq!(suspended_count, 1);

    let stale = store.user("stale").unwrap().unwrap();
    assert_eq!(stale.status, UserStatus::Suspended);
    let at = stale.suspended_at.unwrap();
    assert!((at - now).abs() <= 5, "suspended_at should be about now");

    let fresh = store.user("fresh").unwrap().unwrap();
    assert_eq!(fresh.status, UserStatus::Active);
    assert_eq!(fresh.suspended_at, None);
}

#[tokio::test]
async fn resolved_reports_never_suspend() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = Local::now().timestamp();
    store.insert_user(&active("ok")).unwrap();
    store
        .insert_report("ok", ReportStatus::Approved, now - 60 * DAY)
        .unwrap();
    store
        .insert_report("ok", ReportStatus::Rejected, now - 45 * DAY)
        .unwrap();

    let engine = engine_with(store.clone(), Hub::new());
    let (_, suspended_count) = engine.suspension_sweep().unwrap();
    assert_eq!(suspended_count, 0);
    assert_eq!(store.user("ok").unwrap().unwrap().status, UserStatus::Active);
}

#[tokio::test]
async fn custom_suspend_duration_is_honoured() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = Local::now().timestamp();
    store.insert_user(&suspended("u", now - 10 * DAY)).unwrap();

    // With a 14-day duration a 10-day-old suspension stays in place.
    let engine = PolicyEngine::new(store.clone(), Hub::new(), 14);
    let (reactivated, _) = engine.suspension_sweep().unwrap();
    assert_eq!(reactivated, 0);
    assert_eq!(
        store.user("u").unwrap().unwrap().status,
        UserStatus::Suspended
    );
}
