//! Inkroom Room Server
//!
//! Persists room baselines, draw operations and chat, and relays live traffic
//! between the clients of each room.
//!
//! ## Endpoints
//!
//! - `GET  /ws?token=...` real-time channel (see `inkroom_core::protocol`)
//! - `POST /api/rooms/create`, `GET /api/rooms/list`
//! - `GET  /api/rooms/{room_id}`, `/snapshot`, `/operations?afterSequence=N`, `/messages`
//! - `POST /api/rooms/{room_id}/save`
//!
//! ## Environment
//!
//! - `INKROOM_ADDR` listen address, default `0.0.0.0:3030`
//! - `INKROOM_TOKENS` `token=user,...`; when unset any token is accepted as the user name

mod rest;
mod state;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use state::{AppState, TokenTable};

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

fn listen_addr() -> SocketAddr {
    let fallback = SocketAddr::from(([0, 0, 0, 0], 3030));
    match std::env::var("INKROOM_ADDR") {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid INKROOM_ADDR {:?} ({}), using {}", raw, e, DEFAULT_ADDR);
            fallback
        }),
        Err(_) => fallback,
    }
}

fn token_table() -> TokenTable {
    match std::env::var("INKROOM_TOKENS") {
        Ok(spec) => TokenTable::parse(&spec),
        Err(_) => {
            info!("INKROOM_TOKENS unset, accepting any token as the user name");
            TokenTable::default()
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/rooms/create", post(rest::create_room))
        .route("/api/rooms/list", get(rest::list_rooms))
        .route("/api/rooms/{room_id}", get(rest::room))
        .route("/api/rooms/{room_id}/snapshot", get(rest::snapshot))
        .route("/api/rooms/{room_id}/save", post(rest::save_snapshot))
        .route("/api/rooms/{room_id}/operations", get(rest::operations))
        .route("/api/rooms/{room_id}/messages", get(rest::messages))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkroom_server=info,tower_http=info".into()),
        )
        .init();

    let state = Arc::new(AppState::new(token_table()));
    let app = router(state);

    let addr = listen_addr();
    info!("Inkroom server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// Index page
async fn index() -> &'static str {
    "Inkroom Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}
