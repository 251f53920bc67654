//! WebSocket connection handling
//!
//! Manages WebSocket connections, authentication, and message routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use ha_core::Context;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::AppState;

use super::dispatch::handle_message;
use super::types::{
    AuthInvalidMessage, AuthOkMessage, AuthRequiredMessage, IncomingMessage, OutgoingMessage,
};

/// How long a client has to send `auth` after connecting
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Connection State
// =============================================================================

/// Per-connection state
pub struct ActiveConnection {
    pub state: AppState,
    /// Last message ID received
    last_id: AtomicU64,
    /// Active subscriptions: subscription_id -> cancel sender
    pub subscriptions: RwLock<HashMap<u64, broadcast::Sender<()>>>,
}

impl ActiveConnection {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            last_id: AtomicU64::new(0),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh context for one command
    pub fn new_context(&self) -> Context {
        Context::new()
    }

    /// Message IDs must increase over the life of a connection
    pub fn validate_id(&self, id: u64) -> Result<(), &'static str> {
        let last = self.last_id.load(Ordering::SeqCst);
        if id <= last {
            return Err("id_reuse");
        }
        self.last_id.store(id, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// WebSocket Handler
// =============================================================================

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let ha_version = env!("CARGO_PKG_VERSION").to_string();
    let auth_required = OutgoingMessage::AuthRequired(AuthRequiredMessage {
        msg_type: "auth_required",
        ha_version: ha_version.clone(),
    });
    if let Err(e) = send_message(&mut sender, &auth_required).await {
        error!("Failed to send auth_required: {}", e);
        return;
    }

    let auth_result = tokio::time::timeout(AUTH_TIMEOUT, wait_for_auth(&mut receiver)).await;

    match auth_result {
        Ok(Ok(token)) if is_valid_token(&state, &token) => {
            let auth_ok = OutgoingMessage::AuthOk(AuthOkMessage {
                msg_type: "auth_ok",
                ha_version,
            });
            if let Err(e) = send_message(&mut sender, &auth_ok).await {
                error!("Failed to send auth_ok: {}", e);
                return;
            }
            info!("WebSocket client authenticated");
        }
        Ok(_) => {
            let auth_invalid = OutgoingMessage::AuthInvalid(AuthInvalidMessage {
                msg_type: "auth_invalid",
                message: "Invalid access token or password".to_string(),
            });
            let _ = send_message(&mut sender, &auth_invalid).await;
            warn!("WebSocket client authentication failed");
            return;
        }
        Err(_) => {
            let auth_invalid = OutgoingMessage::AuthInvalid(AuthInvalidMessage {
                msg_type: "auth_invalid",
                message: "Authentication timeout".to_string(),
            });
            let _ = send_message(&mut sender, &auth_invalid).await;
            warn!("WebSocket client authentication timeout");
            return;
        }
    }

    let conn = Arc::new(ActiveConnection::new(state));

    let (tx, mut rx) = mpsc::channel::<OutgoingMessage>(256);

    // Forward queued messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if send_message(&mut sender, &msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                debug!("WS RECV: {}", text);
                if let Err(e) = handle_message(&conn, &text, &tx).await {
                    error!("Error handling message: {}", e);
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    for (_, cancel_tx) in conn.subscriptions.write().await.drain() {
        let _ = cancel_tx.send(());
    }

    send_task.abort();
    info!("WebSocket connection closed");
}

// =============================================================================
// Authentication
// =============================================================================

/// Wait for the `auth` message and return the presented credential
async fn wait_for_auth(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Result<Option<String>, String> {
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<IncomingMessage>(&text) {
                Ok(IncomingMessage::Auth {
                    access_token,
                    api_password,
                }) => return Ok(access_token.or(api_password)),
                _ => return Err("Expected auth message".to_string()),
            },
            Ok(Message::Close(_)) => return Err("Connection closed".to_string()),
            Err(e) => return Err(format!("WebSocket error: {}", e)),
            _ => {}
        }
    }
    Err("Connection closed".to_string())
}

/// A configured token must match exactly; without one any non-empty token passes
pub(crate) fn is_valid_token(state: &AppState, token: &Option<String>) -> bool {
    match (token.as_deref(), state.access_token.as_deref()) {
        (None, _) | (Some(""), _) => false,
        (Some(token), Some(expected)) => token == expected,
        (Some(_), None) => true,
    }
}

/// Send a message to the WebSocket
pub async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &OutgoingMessage,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    debug!("Sending: {}", json);
    sender
        .send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
