use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use client_core::{ClientSettings, CollaborationClient, SessionIdentity};
use serde_json::{json, Value};
use shared::domain::{TenantId, UserId};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct ServerState {
    connections: Arc<AtomicUsize>,
    drop_first_connection: bool,
    queries: mpsc::UnboundedSender<HashMap<String, String>>,
    received: mpsc::UnboundedSender<String>,
}

struct TestServer {
    base_url: String,
    queries: mpsc::UnboundedReceiver<HashMap<String, String>>,
    received: mpsc::UnboundedReceiver<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let _ = state.queries.send(query.clone());
    ws.on_upgrade(move |socket| serve_socket(state, socket, query))
}

async fn serve_socket(state: ServerState, mut socket: WebSocket, query: HashMap<String, String>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    let tenant_id: i64 = query
        .get("tenantId")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    let user_id: i64 = query
        .get("userId")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    let snapshot = json!({
        "type": "presence",
        "userId": 0,
        "tenantId": tenant_id,
        "data": {
            "activeUsers": [
                { "id": user_id, "username": "ada", "lastActiveAt": "2024-05-01T12:00:00Z" }
            ],
            "activeSessions": [
                { "userId": user_id, "sessionType": query.get("sessionType"), "lastActivity": 1714564800000i64 }
            ],
        },
        "timestamp": "2024-05-01T12:00:00Z",
    });
    if socket.send(Message::Text(snapshot.to_string())).await.is_err() {
        return;
    }
    if state.drop_first_connection && connection == 0 {
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Text(text) = msg {
            let _ = state.received.send(text.clone());
            if socket.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    }
}

async fn spawn_server(drop_first_connection: bool) -> TestServer {
    let (queries_tx, queries) = mpsc::unbounded_channel();
    let (received_tx, received) = mpsc::unbounded_channel();
    let state = ServerState {
        connections: Arc::new(AtomicUsize::new(0)),
        drop_first_connection,
        queries: queries_tx,
        received: received_tx,
    };
    let app = Router::new()
        .route("/ws/collaboration", get(ws_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    TestServer {
        base_url: format!("http://{addr}"),
        queries,
        received,
    }
}

fn client_for(server: &TestServer) -> CollaborationClient {
    CollaborationClient::new(ClientSettings {
        server_url: server.base_url.clone(),
        ..ClientSettings::default()
    })
    .expect("client")
}

#[tokio::test]
async fn connects_applies_snapshot_and_round_trips_activity() {
    let mut server = spawn_server(false).await;
    let client = client_for(&server);
    let identity = SessionIdentity::new(UserId(7), TenantId(3), "dataset_view").with_entity(15);
    assert!(client.bind(identity).await);

    let query = timeout(WAIT, server.queries.recv())
        .await
        .expect("connection in time")
        .expect("query");
    assert_eq!(query.get("userId").map(String::as_str), Some("7"));
    assert_eq!(query.get("tenantId").map(String::as_str), Some("3"));
    assert_eq!(query.get("sessionType").map(String::as_str), Some("dataset_view"));
    assert_eq!(query.get("entityId").map(String::as_str), Some("15"));

    let mut state = client.subscribe_state().await.expect("bound");
    let snapshot = timeout(
        WAIT,
        state.wait_for(|s| s.is_connected && !s.active_users.is_empty()),
    )
    .await
    .expect("snapshot in time")
    .expect("state")
    .clone();
    assert_eq!(snapshot.active_users[0].id, UserId(7));
    assert_eq!(snapshot.active_sessions[0].session_type, "dataset_view");

    assert!(
        client
            .send_activity("edited", "renamed column", "transformation", Some(5), None)
            .await
    );
    let text = timeout(WAIT, server.received.recv())
        .await
        .expect("delivery in time")
        .expect("text");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value["type"], "activity");
    assert_eq!(value["userId"], 7);
    assert_eq!(value["data"]["description"], "renamed column");

    let echoed = timeout(WAIT, state.wait_for(|s| !s.recent_activity.is_empty()))
        .await
        .expect("echo in time")
        .expect("state")
        .clone();
    assert_eq!(
        echoed.recent_activity.newest().map(|m| m.data["action"].clone()),
        Some(json!("edited"))
    );

    client.dispose().await;
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let mut server = spawn_server(true).await;
    let client = client_for(&server);
    assert!(
        client
            .bind(SessionIdentity::new(UserId(2), TenantId(1), "job_monitor"))
            .await
    );

    for _ in 0..2 {
        timeout(WAIT, server.queries.recv())
            .await
            .expect("connection in time")
            .expect("query");
    }

    let mut state = client.subscribe_state().await.expect("bound");
    timeout(WAIT, state.wait_for(|s| s.is_connected))
        .await
        .expect("reconnected in time")
        .expect("state");

    client.dispose().await;
    assert!(!client.state().await.is_connected);
}
