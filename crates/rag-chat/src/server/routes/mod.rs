//! Chat routes

pub mod chat;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build the chat routes
pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/chat/ws_connect", get(ws::ws_connect))
}
