//! Home Assistant WebSocket API
//!
//! Implements the Home Assistant WebSocket API for real-time communication.
//! Protocol: https://developers.home-assistant.io/docs/api/websocket
//!
//! This module is organized into:
//! - `types` - Message type definitions (IncomingMessage, OutgoingMessage, etc.)
//! - `connection` - Connection handling and authentication
//! - `dispatch` - Message routing to handlers
//! - `handlers` - Individual command handlers

mod connection;
mod dispatch;
mod handlers;
mod types;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}
