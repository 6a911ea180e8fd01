//! Axum app: shared state and the WebSocket upgrade route.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use shuttle::{GraphRuntime, Store};

use super::connection::handle_socket;

pub struct AppState {
    pub runtime: Arc<GraphRuntime>,
    pub store: Arc<dyn Store>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
