//! Admin HTTP API tests against a served router.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;

use lobby_gateway::api;
use lobby_gateway::app_state::AppState;
use lobby_gateway::broker::{Broker, MemoryBroker};
use lobby_gateway::domain::{Session, SessionStore};
use lobby_gateway::persistence::Account;
use lobby_gateway::queue::{ACCOUNT_NOTIFY_QUEUE, queue_key};
use lobby_gateway::ws::{Connection, ConnectionList};

struct Admin {
    base: String,
    state: AppState,
}

async fn serve() -> Admin {
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let state = AppState::new(ConnectionList::new(), SessionStore::new(), broker);
    let app = api::build_router().with_state(state.clone());

    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local address");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Admin {
        base: format!("http://{addr}"),
        state,
    }
}

async fn get_json(url: &str) -> (u16, Value) {
    let Ok(response) = reqwest::get(url).await else {
        panic!("request to {url} failed");
    };
    let status = response.status().as_u16();
    let Ok(body) = response.json::<Value>().await else {
        panic!("response from {url} is not JSON");
    };
    (status, body)
}

async fn add_connection(state: &AppState, account_id: Option<i64>) -> Arc<Connection> {
    let Ok(peer) = "10.0.0.1:5000".parse::<SocketAddr>() else {
        panic!("bad address");
    };
    let connection = Arc::new(Connection::new(Some(peer), Box::new(tokio::io::sink())));
    if let Some(id) = account_id {
        let _ = connection.attach_account(Account {
            id,
            username: format!("user{id}"),
        });
    }
    state
        .sessions
        .create(connection.id(), Some(Session::new(connection.id())));
    state.connections.insert(Arc::clone(&connection)).await;
    connection
}

#[tokio::test]
async fn health_reports_live_connections() {
    let admin = serve().await;
    let _ = add_connection(&admin.state, None).await;

    let (status, body) = get_json(&format!("{}/health", admin.base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn connections_list_includes_account_and_session() {
    let admin = serve().await;
    let identified = add_connection(&admin.state, Some(7)).await;
    let _ = add_connection(&admin.state, None).await;

    let (status, body) = get_json(&format!("{}/connections", admin.base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 2);
    assert_eq!(body["identified"], 1);

    let (status, body) =
        get_json(&format!("{}/connections/{}", admin.base, identified.id())).await;
    assert_eq!(status, 200);
    assert_eq!(body["account"]["id"], 7);
    assert_eq!(body["state"], "awaiting_handshake");
    assert_eq!(body["peer"], "10.0.0.1:5000");
    assert_eq!(body["session"]["connection_id"], identified.id().to_string());
}

#[tokio::test]
async fn unknown_connection_is_a_structured_404() {
    let admin = serve().await;

    let (status, body) = get_json(&format!("{}/connections/not-a-uuid", admin.base)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], 2001);
}

#[tokio::test]
async fn queues_report_backlog() {
    let admin = serve().await;
    let _ = admin
        .state
        .broker
        .list_push(&queue_key(ACCOUNT_NOTIFY_QUEUE), "{}".to_string())
        .await;

    let (status, body) = get_json(&format!("{}/queues", admin.base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 1);
    assert_eq!(body["queues"][0]["name"], ACCOUNT_NOTIFY_QUEUE);
    assert_eq!(body["queues"][0]["length"], 1);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let admin = serve().await;
    let (status, body) = get_json(&format!("{}/api-docs/openapi.json", admin.base)).await;
    assert_eq!(status, 200);
    assert!(body["paths"]["/health"].is_object());
}
