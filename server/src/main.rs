use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use replay_server::autoplay::spawn_autoplay_loop;
use replay_server::config::ServerConfig;
use replay_server::data::CandleStore;
use replay_server::state::AppState;
use replay_server::{routes, ws};

#[tokio::main]
async fn main() {
    // Initialise tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = ServerConfig::from_env();
    let bind = cfg.bind.clone();
    let port = cfg.port;

    let store = CandleStore::load(&cfg);
    if store.available_timeframes().is_empty() {
        tracing::warn!(
            "no datasets found under {}; the server will reject chart requests",
            cfg.data_path.display()
        );
    }

    let state = AppState::new(cfg, store);

    // Start the auto-play driver.
    spawn_autoplay_loop(Arc::clone(&state));

    let app = Router::new()
        .merge(routes::api_router())
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .expect("invalid bind address");

    tracing::info!("replay server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received, stopping");
}
