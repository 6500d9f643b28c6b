//! lobby-gateway server entry point.
//!
//! Starts the WebSocket listener, the queue processor and the admin HTTP
//! API, and shuts all three down on Ctrl-C.

use std::sync::Arc;

use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use lobby_gateway::api;
use lobby_gateway::app_state::AppState;
use lobby_gateway::broker::{Broker, MemoryBroker, RedisBroker};
use lobby_gateway::config::ServerConfig;
use lobby_gateway::domain::SessionStore;
use lobby_gateway::persistence::{AccountDirectory, MemoryDirectory, PostgresDirectory};
use lobby_gateway::protocol::OpCode;
use lobby_gateway::queue::{
    ACCOUNT_NOTIFY_QUEUE, AccountQueue, CHAT_EVENTS_QUEUE, ChatQueue, QueueProcessor,
};
use lobby_gateway::ws::hubs::{IdentifyHub, PingHub};
use lobby_gateway::ws::{ConnectionList, ConnectionServer, HubRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(ws = %config.ws_listen_addr, admin = %config.admin_listen_addr, "starting lobby-gateway");

    // Collaborators
    let broker: Arc<dyn Broker> = if let Some(url) = &config.redis_url {
        let broker = RedisBroker::connect(url).await?;
        tracing::info!("connected to redis broker");
        Arc::new(broker)
    } else {
        tracing::warn!("REDIS_URL not set, using an in-process broker that only this gateway can reach");
        Arc::new(MemoryBroker::new())
    };
    let directory: Arc<dyn AccountDirectory> = if config.persistence_enabled {
        Arc::new(PostgresDirectory::connect_lazy(
            &config.database_url,
            config.database_max_connections,
            config.database_connect_timeout(),
        )?)
    } else {
        tracing::warn!("persistence disabled, using an empty in-memory account directory");
        Arc::new(MemoryDirectory::new())
    };

    // Shared state
    let connections = ConnectionList::new();
    let sessions = SessionStore::with_lock_timeout(config.entity_lock_timeout());

    // Queues
    let mut processor = QueueProcessor::new(Arc::clone(&broker))
        .with_poll_interval(config.queue_poll_interval());
    processor
        .register(ACCOUNT_NOTIFY_QUEUE, AccountQueue::new(connections.clone()))
        .register(
            CHAT_EVENTS_QUEUE,
            ChatQueue::new(connections.clone(), Arc::clone(&directory)),
        );

    // Hubs
    let mut hubs = HubRegistry::new();
    hubs.register(OpCode::Ping, false, PingHub::new(sessions.clone()))
        .register(
            OpCode::Identify,
            true,
            IdentifyHub::new(
                Arc::clone(&broker),
                Arc::clone(&directory),
                sessions.clone(),
                processor.sender(),
            ),
        );

    // Shutdown signal shared by every task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = move || {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    };

    let queue_task = tokio::spawn({
        let shutdown = shutdown();
        async move { processor.run(shutdown).await }
    });

    let admin_task = if config.admin_enabled {
        let state = AppState::new(connections.clone(), sessions.clone(), Arc::clone(&broker));
        let app = api::build_router()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state);
        let listener = tokio::net::TcpListener::bind(config.admin_listen_addr).await?;
        tracing::info!(addr = %config.admin_listen_addr, "admin api listening");
        let shutdown = shutdown();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "admin api failed");
            }
        }))
    } else {
        None
    };

    let server = ConnectionServer::bind(
        config.ws_listen_addr,
        Arc::new(hubs),
        connections,
        sessions,
    )
    .await?;
    let server_task = tokio::spawn(server.run(shutdown()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    server_task.await?;
    queue_task.await?;
    if let Some(admin_task) = admin_task {
        admin_task.await?;
    }

    tracing::info!("lobby-gateway stopped");
    Ok(())
}
