//! WebSocket message dispatch
//!
//! Routes incoming messages to the appropriate handler.

use std::sync::Arc;

use ha_components::ItemUpdate;
use tokio::sync::mpsc;
use tracing::warn;

use super::connection::ActiveConnection;
use super::handlers;
use super::types::{IncomingMessage, OutgoingMessage, PongMessage};

/// Handle an incoming message
pub async fn handle_message(
    conn: &Arc<ActiveConnection>,
    text: &str,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> Result<(), String> {
    let msg: IncomingMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => return reject_unparsed(text, e, tx).await,
    };

    if let Some(id) = message_id(&msg) {
        if let Err(code) = conn.validate_id(id) {
            let reply = OutgoingMessage::error(id, code, "Identifier values have to increase.");
            return tx.send(reply).await.map_err(|e| e.to_string());
        }
    }

    match msg {
        // Already authenticated
        IncomingMessage::Auth { .. } => Ok(()),
        IncomingMessage::CallService {
            id,
            domain,
            service,
            service_data,
            return_response,
        } => {
            handlers::handle_call_service(conn, id, domain, service, service_data, return_response, tx)
                .await
        }
        IncomingMessage::Ping { id } => {
            let pong = OutgoingMessage::Pong(PongMessage {
                id,
                msg_type: "pong",
            });
            tx.send(pong).await.map_err(|e| e.to_string())
        }
        IncomingMessage::ShoppingListItems { id } => handlers::handle_items(conn, id, tx).await,
        IncomingMessage::ShoppingListAdd { id, name } => {
            handlers::handle_add_item(conn, id, &name, tx).await
        }
        IncomingMessage::ShoppingListUpdate {
            id,
            item_id,
            name,
            complete,
        } => {
            let update = ItemUpdate { name, complete };
            handlers::handle_update_item(conn, id, &item_id, update, tx).await
        }
        IncomingMessage::ShoppingListRemove { id, item_id } => {
            handlers::handle_remove_item(conn, id, &item_id, tx).await
        }
        IncomingMessage::ShoppingListClear { id } => handlers::handle_clear(conn, id, tx).await,
        IncomingMessage::SubscribeEvents { id, event_type } => {
            handlers::handle_subscribe_events(conn, id, event_type, tx).await
        }
        IncomingMessage::UnsubscribeEvents { id, subscription } => {
            handlers::handle_unsubscribe_events(conn, id, subscription, tx).await
        }
    }
}

fn message_id(msg: &IncomingMessage) -> Option<u64> {
    match msg {
        IncomingMessage::Auth { .. } => None,
        IncomingMessage::CallService { id, .. }
        | IncomingMessage::Ping { id }
        | IncomingMessage::ShoppingListItems { id }
        | IncomingMessage::ShoppingListAdd { id, .. }
        | IncomingMessage::ShoppingListUpdate { id, .. }
        | IncomingMessage::ShoppingListRemove { id, .. }
        | IncomingMessage::ShoppingListClear { id }
        | IncomingMessage::SubscribeEvents { id, .. }
        | IncomingMessage::UnsubscribeEvents { id, .. } => Some(*id),
    }
}

/// Answer a message that did not parse, if it carries an id to answer to
async fn reject_unparsed(
    text: &str,
    err: serde_json::Error,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> Result<(), String> {
    let json: Option<serde_json::Value> = serde_json::from_str(text).ok();
    let id = json.as_ref().and_then(|j| j.get("id")).and_then(|id| id.as_u64());
    let msg_type = json
        .as_ref()
        .and_then(|j| j.get("type"))
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    warn!(msg_type = %msg_type, "Rejected WebSocket message: {}", err);

    let Some(id) = id else {
        return Err(format!("Invalid message format: {}", err));
    };
    let reply = if err.to_string().starts_with("unknown variant") {
        OutgoingMessage::error(id, "unknown_command", "Unknown command.")
    } else {
        OutgoingMessage::error(id, "invalid_format", format!("Message incorrectly formatted: {}", err))
    };
    tx.send(reply).await.map_err(|e| e.to_string())
}
