//! Realtime push hub: live connections grouped into named rooms.
//!
//! The hub keeps both directions of the room⇄connection index in one
//! mutex-guarded structure so a closing connection can be removed from every
//! room and from the member index in a single locked step.  Delivery is
//! best-effort fan-out: payloads are serialized once, a failed send to one
//! member never affects the others, and there is no backlog or replay — a
//! client that is not connected and subscribed at send time misses the
//! event.  A process restart clears all subscriptions; clients re-subscribe.
//!
//! Rooms are addressed by convention: `user:<id>` for a single user's
//! private channel, `panel:<id>` for a shared panel.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{logging, mlog};

/// Fixed endpoint claimed by [`Hub::attach`].  Upgrade requests anywhere
/// else are left for other handlers.
pub const REALTIME_PATH: &str = "/realtime/ws";

pub type ConnId = u64;

/// Room name for a single user's private channel.
pub fn user_room(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Room name for a shared panel channel.
pub fn panel_room(panel_id: &str) -> String {
    format!("panel:{panel_id}")
}

struct HubInner {
    /// room name -> member connections
    rooms: HashMap<String, HashSet<ConnId>>,
    /// connection -> rooms it joined (reverse index)
    members: HashMap<ConnId, HashSet<String>>,
    /// connection -> outbound frame channel
    senders: HashMap<ConnId, mpsc::UnboundedSender<String>>,
    next_conn_id: ConnId,
}

/// In-process registry of live realtime connections.
///
/// Cloning is cheap; all clones share the same index.  The index is only
/// ever touched under the mutex and no lock is held across an await, so the
/// hub is safe to drive from concurrent connection tasks, request handlers,
/// and sweep timers alike.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Mutex<HubInner>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                rooms: HashMap::new(),
                members: HashMap::new(),
                senders: HashMap::new(),
                next_conn_id: 0,
            })),
        }
    }

    /// Add the realtime websocket endpoint to `router` at [`REALTIME_PATH`].
    /// Every other route on the router is left untouched.
    pub fn attach(&self, router: Router) -> Router {
        router.merge(
            Router::new()
                .route(REALTIME_PATH, get(ws_handler))
                .with_state(self.clone()),
        )
    }

    /// Allocate a connection and its outbound frame channel.  The caller
    /// (normally the websocket task) pumps the receiver into the transport
    /// and must call [`Hub::disconnect`] when the transport closes.
    pub fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let conn = inner.next_conn_id;
        inner.next_conn_id += 1;
        inner.members.insert(conn, HashSet::new());
        inner.senders.insert(conn, tx);
        (conn, rx)
    }

    /// Add `conn` to `room`, recording the membership in both directions.
    /// Returns `false` if the connection has already closed.
    pub fn subscribe(&self, conn: ConnId, room: &str) -> bool {
        let mut inner = self.lock();
        let Some(joined) = inner.members.get_mut(&conn) else {
            return false;
        };
        joined.insert(room.to_string());
        inner.rooms.entry(room.to_string()).or_default().insert(conn);
        true
    }

    /// Serialize `payload` once and send it to every current member of
    /// `room`.  A send failure for one connection does not abort delivery
    /// to the others.  Returns the number of successful sends.
    pub fn notify(&self, room: &str, payload: &Value) -> usize {
        let text = payload.to_string();
        let inner = self.lock();
        let Some(conns) = inner.rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for conn in conns {
            if let Some(tx) = inner.senders.get(conn) {
                if tx.send(text.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Push to the `user:<id>` room.
    pub fn notify_user(&self, user_id: &str, payload: &Value) -> usize {
        self.notify(&user_room(user_id), payload)
    }

    /// Push to the `panel:<id>` room.
    pub fn notify_panel(&self, panel_id: &str, payload: &Value) -> usize {
        self.notify(&panel_room(panel_id), payload)
    }

    /// Remove `conn` from every room it joined and from the member index.
    /// Both directions are cleaned in the same locked step so no dangling
    /// references remain.  Idempotent.
    pub fn disconnect(&self, conn: ConnId) {
        let mut inner = self.lock();
        inner.senders.remove(&conn);
        let joined = inner.members.remove(&conn).unwrap_or_default();
        for room in joined {
            if let Some(conns) = inner.rooms.get_mut(&room) {
                conns.remove(&conn);
                if conns.is_empty() {
                    inner.rooms.remove(&room);
                }
            }
        }
    }

    /// Current member count of `room`.
    pub fn room_size(&self, room: &str) -> usize {
        self.lock().rooms.get(room).map_or(0, |c| c.len())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.lock().members.len()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Hub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, hub))
}

async fn handle_ws_connection(mut socket: WebSocket, hub: Hub) {
    let (conn, mut rx) = hub.register();
    mlog!("hub: connection {conn} opened");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&hub, conn, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    hub.disconnect(conn);
    mlog!("hub: connection {conn} closed");
}

/// Client→server frames.  Only `{"type":"subscribe","room":"..."}` is
/// meaningful; anything else is ignored.
fn handle_client_frame(hub: &Hub, conn: ConnId, text: &str) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return;
    };
    if frame.get("type").and_then(|v| v.as_str()) != Some("subscribe") {
        return;
    }
    if let Some(room) = frame.get("room").and_then(|v| v.as_str()) {
        hub.subscribe(conn, room);
        mlog!("hub: connection {conn} joined {}", logging::room(room));
    }
}
