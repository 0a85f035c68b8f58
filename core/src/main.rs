use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use socketioxide::extract::{Data, SocketRef};
use socketioxide::SocketIo;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use telemetry_core::alerts::AlertEngine;
use telemetry_core::config::Config;
use telemetry_core::dispatch::Dispatcher;
use telemetry_core::gateway::{self, SessionRegistry};
use telemetry_core::hub::{Hub, HubMessage};
use telemetry_core::pipeline::Pipeline;
use telemetry_core::{auth, db, logging, pubsub};

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    signing_secret: Arc<String>,
}

async fn health_check() -> axum::Json<Value> {
    axum::Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Handles one dashboard WebSocket connection. A client authenticates itself
/// after connecting by emitting `subscribe` with the signed token it was
/// handed at login; every subscriber just gets their own user's
/// position/alert stream, nothing role-gated.
fn on_connect(socket: SocketRef, state: AppState) {
    info!("dashboard: socket {} connected", socket.id);

    socket.on(
        "subscribe",
        move |s: SocketRef, Data::<Value>(data)| {
            let state = state.clone();
            async move {
                let Some(token) = data["token"].as_str() else {
                    warn!("dashboard: socket {} sent subscribe with no token", s.id);
                    let _ = s.disconnect();
                    return;
                };
                let user_id = match auth::verify_subscriber_token(token, &state.signing_secret) {
                    Ok(id) => id,
                    Err(_) => {
                        warn!("dashboard: socket {} presented an invalid subscriber token", s.id);
                        let _ = s.disconnect();
                        return;
                    }
                };

                let (subscription_id, mut rx) = state.hub.subscribe(user_id).await;
                let forward_socket = s.clone();
                tokio::spawn(async move {
                    while let Some(message) = rx.recv().await {
                        let event = match &message {
                            HubMessage::PositionUpdate(_) => "position-update",
                            HubMessage::Alert { .. } => "alert",
                        };
                        if forward_socket.emit(event, &message).is_err() {
                            break;
                        }
                    }
                });

                let hub = state.hub.clone();
                s.on_disconnect(move |_: SocketRef| {
                    let hub = hub.clone();
                    async move {
                        hub.unsubscribe(user_id, subscription_id).await;
                    }
                });

                info!("dashboard: socket {} subscribed as user {user_id}", s.id);
            }
        },
    );
}

#[tokio::main]
async fn main() {
    logging::setup();

    let config = Config::load();
    info!("telemetry-core v{} starting", env!("CARGO_PKG_VERSION"));

    let db = match db::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("failed to connect to database: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("migrations").run(&db).await {
        tracing::error!("failed to run database migrations: {e}");
        std::process::exit(1);
    }

    let hub = Hub::new();

    if let Some(pubsub_url) = &config.pubsub_url {
        match pubsub::PubSub::connect(pubsub_url) {
            Ok(ps) => {
                let ps = Arc::new(ps);
                hub.attach_pubsub(ps.clone()).await;
                tokio::spawn(ps.run_subscriber(hub.clone()));
                info!("pubsub: subscribed to cross-process broadcast channel");
            }
            Err(e) => warn!("pubsub: failed to connect to {pubsub_url}: {e}, falling back to single-process fan-out"),
        }
    }

    let alert_engine = AlertEngine::new(db.clone(), hub.clone(), config.notification_dispatch_url.clone());
    let pipeline = Pipeline::new(db.clone(), hub.clone(), alert_engine.clone());
    let registry = SessionRegistry::new();
    let dispatcher = Dispatcher::new(db.clone(), registry.clone(), config.command_ack_timeout_secs);

    gateway::spawn_listeners(&config, pipeline.clone(), dispatcher.clone(), registry.clone());
    gateway::spawn_background_sweeps(&config, dispatcher.clone(), alert_engine.clone());

    let state = AppState { hub: hub.clone(), signing_secret: Arc::new(config.signing_secret.clone()) };
    let (socket_layer, io) = SocketIo::builder().build_layer();
    io.ns("/", move |socket: SocketRef| {
        let state = state.clone();
        async move { on_connect(socket, state) }
    });

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_check))
        .layer(socket_layer)
        .layer(cors);

    let addr = std::net::SocketAddr::new(config.bind_address, config.http_port);
    info!("dashboard HTTP/WebSocket surface listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("failed to bind dashboard HTTP listener on {addr}: {e}");
            std::process::exit(1);
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

/// Waits for SIGINT/SIGTERM so in-flight connection tasks get a chance to
/// finish their current read/decode/persist cycle rather than being killed
/// mid-write — the gateway's per-connection tasks themselves have no
/// explicit drain hook, but axum will stop accepting new HTTP/WebSocket
/// work immediately on this signal while the gateway listeners (spawned
/// independently) keep serving already-connected trackers until the
/// process actually exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining HTTP/WebSocket surface");
}
