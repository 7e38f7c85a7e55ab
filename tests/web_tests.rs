//! HTTP-level tests for the guarded API surface: a real server is bound on
//! an ephemeral port and driven with blocking ureq calls, with the store
//! and hub shared in-process so tests can flip state between requests.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::oneshot;

use mentord::api::{router, AppState};
use mentord::governor::RateGovernor;
use mentord::hub::Hub;
use mentord::store::{DataStore, SqliteStore, User, UserStatus};

struct TestServer {
    base_url: String,
    store: Arc<SqliteStore>,
    hub: Hub,
    _shutdown: oneshot::Sender<()>,
}

async fn start_server() -> TestServer {
    let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
    let hub = Hub::new();
    let state = AppState::new(
        store.clone() as Arc<dyn DataStore>,
        Arc::new(RateGovernor::new()),
        hub.clone(),
    );
    let app = hub.attach(router(state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    TestServer {
        base_url: format!("http://{addr}"),
        store,
        hub,
        _shutdown: shutdown_tx,
    }
}

fn status_of(result: Result<ureq::Response, ureq::Error>) -> u16 {
    match result {
        Ok(response) => response.status(),
        Err(ureq::Error::Status(code, _)) => code,
        Err(e) => panic!("transport error: {e}"),
    }
}

fn active_user(id: &str) -> User {
    User {
        id: id.to_string(),
        status: UserStatus::Active,
        suspended_at: None,
    }
}

#[tokio::test]
async fn suspension_is_seen_by_the_very_next_guarded_request() {
    let server = start_server().await;
    server.store.insert_user(&active_user("alice")).unwrap();

    let base = server.base_url.clone();
    let first = tokio::task::spawn_blocking(move || {
        status_of(
            ureq::post(&format!("{base}/api/reports"))
                .set("x-user-id", "alice")
                .call(),
        )
    })
    .await
    .unwrap();
    assert_eq!(first, 201);

    // Mid-session state flip, as the nightly sweep would do it.
    server
        .store
        .set_users_suspended(&["alice".to_string()], 1_000)
        .unwrap();

    let base = server.base_url.clone();
    let second = tokio::task::spawn_blocking(move || {
        status_of(
            ureq::post(&format!("{base}/api/reports"))
                .set("x-user-id", "alice")
                .call(),
        )
    })
    .await
    .unwrap();
    assert_eq!(second, 403, "no caching may mask the status change");
}

#[tokio::test]
async fn signin_attempts_are_throttled_per_identifier() {
    let server = start_server().await;
    let base = server.base_url.clone();

    let statuses = tokio::task::spawn_blocking(move || {
        let mut statuses = Vec::new();
        for _ in 0..11 {
            statuses.push(status_of(
                ureq::post(&format!("{base}/api/signin"))
                    .send_json(json!({"identifier": "alice@example.com"})),
            ));
        }
        // A different identifier has its own window.
        statuses.push(status_of(
            ureq::post(&format!("{base}/api/signin"))
                .send_json(json!({"identifier": "bob@example.com"})),
        ));
        statuses
    })
    .await
    .unwrap();

    assert!(statuses[..10].iter().all(|s| *s == 204));
    assert_eq!(statuses[10], 429);
    assert_eq!(statuses[11], 204);
}

#[tokio::test]
async fn daily_report_cap_is_store_backed() {
    let server = start_server().await;
    server.store.insert_user(&active_user("stu")).unwrap();

    let base = server.base_url.clone();
    let statuses = tokio::task::spawn_blocking(move || {
        (0..4)
            .map(|_| {
                status_of(
                    ureq::post(&format!("{base}/api/reports"))
                        .set("x-user-id", "stu")
                        .call(),
                )
            })
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();

    assert_eq!(statuses, vec![201, 201, 201, 429]);
    // The cap came from the Report table, not a counter.
    let (start, end) = mentord::store::local_day_bounds(chrono::Local::now());
    assert_eq!(
        server.store.count_reports_between("stu", start, end).unwrap(),
        3
    );
}

#[tokio::test]
async fn restricted_panel_chat_is_throttled_and_fanned_out() {
    let server = start_server().await;
    server.store.insert_user(&active_user("kid")).unwrap();

    let (conn, mut rx) = server.hub.register();
    server.hub.subscribe(conn, "panel:family");

    let base = server.base_url.clone();
    let statuses = tokio::task::spawn_blocking(move || {
        (0..3)
            .map(|i| {
                status_of(
                    ureq::post(&format!("{base}/api/chat/family"))
                        .set("x-user-id", "kid")
                        .send_json(json!({"message": format!("hi {i}"), "restricted": true})),
                )
            })
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();

    assert_eq!(statuses, vec![202, 202, 429]);

    let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(first["type"], "chat");
    assert_eq!(first["sender_id"], "kid");
    let second: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(second["message"], "hi 1");
}

#[tokio::test]
async fn unrestricted_chat_is_not_throttled() {
    let server = start_server().await;
    server.store.insert_user(&active_user("kid")).unwrap();

    let base = server.base_url.clone();
    let statuses = tokio::task::spawn_blocking(move || {
        (0..5)
            .map(|_| {
                status_of(
                    ureq::post(&format!("{base}/api/chat/open"))
                        .set("x-user-id", "kid")
                        .send_json(json!({"message": "hello"})),
                )
            })
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();
    assert!(statuses.iter().all(|s| *s == 202));
}

#[tokio::test]
async fn identity_errors_are_distinct_from_blocking() {
    let server = start_server().await;
    let base = server.base_url.clone();

    let (missing, unknown, health) = tokio::task::spawn_blocking(move || {
        let missing = status_of(ureq::post(&format!("{base}/api/reports")).call());
        let unknown = status_of(
            ureq::post(&format!("{base}/api/reports"))
                .set("x-user-id", "nobody")
                .call(),
        );
        let health = status_of(ureq::get(&format!("{base}/health")).call());
        (missing, unknown, health)
    })
    .await
    .unwrap();

    assert_eq!(missing, 401);
    assert_eq!(unknown, 401);
    assert_eq!(health, 200);
}

#[tokio::test]
async fn notifications_endpoint_lists_sweep_output() {
    let server = start_server().await;
    server.store.insert_user(&active_user("nina")).unwrap();
    server
        .store
        .create_notification("nina", "REMINDER", "file your report", 1_000)
        .unwrap();

    let base = server.base_url.clone();
    let body = tokio::task::spawn_blocking(move || {
        ureq::get(&format!("{base}/api/notifications"))
            .set("x-user-id", "nina")
            .call()
            .expect("list notifications")
            .into_json::<serde_json::Value>()
            .expect("json body")
    })
    .await
    .unwrap();

    let list = body.as_array().expect("array");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["kind"], "REMINDER");
    assert!(list[0]["read_at"].is_null());
}
