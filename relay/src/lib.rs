//! Duet Relay - development relay for the Duet sync engine.
//!
//! Serves an in-memory remote store over HTTP (pull, push, delete per
//! collection) and WebSocket (realtime change feeds), so two devices can sync
//! against a local process instead of the hosted backend.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use crate::websocket::ConnectionManager;
use axum::Router;
use duet_engine::MemoryRemote;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub remote: MemoryRemote,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(remote: MemoryRemote) -> Self {
        Self {
            remote,
            conn_manager: ConnectionManager::new_shared(),
        }
    }
}

/// The full relay: every route plus tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
