//! Routes of the shared listener port.
//!
//! `GET /` serves the status banner and the channel route upgrades to a
//! WebSocket. Other paths get 404 and other methods 405.

use super::websocket;
use crate::server::GatewayServer;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

/// Body served on `GET /`.
pub const BANNER: &str = "<h1>termgate gateway running</h1>";

/// Route of the channel endpoint; `key` is the session key.
pub const CHANNEL_ROUTE: &str = "/ws-shell/{key}";

pub fn router(server: Arc<GatewayServer>) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route(CHANNEL_ROUTE, get(websocket::channel_upgrade))
        .with_state(server)
}

async fn status_page() -> Html<&'static str> {
    Html(BANNER)
}
