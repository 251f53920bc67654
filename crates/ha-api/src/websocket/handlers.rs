//! WebSocket command handlers
//!
//! Individual handlers for each WebSocket command type.

use std::sync::Arc;

use ha_components::{ItemUpdate, ShoppingListError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::connection::ActiveConnection;
use super::types::{EventMessage, OutgoingMessage};

type HandlerResult = Result<(), String>;

async fn send(tx: &mpsc::Sender<OutgoingMessage>, msg: OutgoingMessage) -> HandlerResult {
    tx.send(msg).await.map_err(|e| e.to_string())
}

fn context_json(context: &ha_core::Context) -> serde_json::Value {
    serde_json::json!({
        "id": context.id,
        "parent_id": context.parent_id,
        "user_id": context.user_id,
    })
}

// =============================================================================
// Shopping List Handlers
// =============================================================================

fn shopping_list_error(id: u64, err: ShoppingListError) -> OutgoingMessage {
    match err {
        ShoppingListError::ItemNotFound(_) => {
            OutgoingMessage::error(id, "item_not_found", "Item not found")
        }
        ShoppingListError::NotLoaded => OutgoingMessage::error(id, "not_loaded", err.to_string()),
        ShoppingListError::InvalidItem(_) => {
            OutgoingMessage::error(id, "invalid_format", err.to_string())
        }
        err => {
            warn!("Shopping list command failed: {}", err);
            OutgoingMessage::error(id, "unknown_error", err.to_string())
        }
    }
}

fn to_json<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

/// Handle shopping_list/items command
pub async fn handle_items(
    conn: &Arc<ActiveConnection>,
    id: u64,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> HandlerResult {
    let reply = match conn.state.shopping_list.items().await {
        Ok(items) => OutgoingMessage::success(id, to_json(items)),
        Err(e) => shopping_list_error(id, e),
    };
    send(tx, reply).await
}

/// Handle shopping_list/items/add command
pub async fn handle_add_item(
    conn: &Arc<ActiveConnection>,
    id: u64,
    name: &str,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> HandlerResult {
    let context = conn.new_context();
    let reply = match conn.state.shopping_list.add_item(name, &context).await {
        Ok(item) => OutgoingMessage::success(id, to_json(item)),
        Err(e) => shopping_list_error(id, e),
    };
    send(tx, reply).await
}

/// Handle shopping_list/items/update command
pub async fn handle_update_item(
    conn: &Arc<ActiveConnection>,
    id: u64,
    item_id: &str,
    update: ItemUpdate,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> HandlerResult {
    let context = conn.new_context();
    let reply = match conn
        .state
        .shopping_list
        .update_item(item_id, update, &context)
        .await
    {
        Ok(item) => OutgoingMessage::success(id, to_json(item)),
        Err(e) => shopping_list_error(id, e),
    };
    send(tx, reply).await
}

/// Handle shopping_list/items/remove command
pub async fn handle_remove_item(
    conn: &Arc<ActiveConnection>,
    id: u64,
    item_id: &str,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> HandlerResult {
    let context = conn.new_context();
    let reply = match conn.state.shopping_list.remove_item(item_id, &context).await {
        Ok(_) => OutgoingMessage::success(id, serde_json::Value::Null),
        Err(e) => shopping_list_error(id, e),
    };
    send(tx, reply).await
}

/// Handle shopping_list/items/clear command
pub async fn handle_clear(
    conn: &Arc<ActiveConnection>,
    id: u64,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> HandlerResult {
    let context = conn.new_context();
    let reply = match conn.state.shopping_list.clear_completed(&context).await {
        Ok(_) => OutgoingMessage::success(id, serde_json::Value::Null),
        Err(e) => shopping_list_error(id, e),
    };
    send(tx, reply).await
}

// =============================================================================
// Service Handlers
// =============================================================================

/// Handle call_service command
pub async fn handle_call_service(
    conn: &Arc<ActiveConnection>,
    id: u64,
    domain: String,
    service: String,
    service_data: Option<serde_json::Value>,
    return_response: bool,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> HandlerResult {
    let data = service_data.unwrap_or_else(|| serde_json::json!({}));
    let context = conn.new_context();

    let reply = match conn
        .state
        .service_registry
        .call(&domain, &service, data, context.clone(), return_response)
        .await
    {
        Ok(response) => {
            let mut result = serde_json::json!({ "context": context_json(&context) });
            if return_response {
                if let Some(response) = response {
                    result["response"] = response;
                }
            }
            OutgoingMessage::success(id, result)
        }
        Err(e) => {
            let code = match e {
                ha_service_registry::ServiceError::NotFound { .. } => "not_found",
                ha_service_registry::ServiceError::InvalidData(_) => "invalid_format",
                _ => "service_error",
            };
            OutgoingMessage::error(id, code, e.to_string())
        }
    };
    send(tx, reply).await
}

// =============================================================================
// Event Subscription Handlers
// =============================================================================

/// Handle subscribe_events command
pub async fn handle_subscribe_events(
    conn: &Arc<ActiveConnection>,
    id: u64,
    event_type: Option<String>,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> HandlerResult {
    let (cancel_tx, mut cancel_rx) = broadcast::channel::<()>(1);
    conn.subscriptions.write().await.insert(id, cancel_tx);

    let mut event_rx = match &event_type {
        Some(event_type) => conn.state.event_bus.subscribe(event_type.as_str()),
        None => conn.state.event_bus.subscribe_all(),
    };
    let forward = tx.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    debug!("Subscription {} cancelled", id);
                    break;
                }
                result = event_rx.recv() => {
                    match result {
                        Ok(event) => {
                            let event_msg = OutgoingMessage::Event(EventMessage {
                                id,
                                msg_type: "event",
                                event: serde_json::json!({
                                    "event_type": event.event_type,
                                    "data": event.data,
                                    "origin": "LOCAL",
                                    "time_fired": event.time_fired.to_rfc3339(),
                                    "context": context_json(&event.context),
                                }),
                            });
                            if forward.send(event_msg).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Subscription {} skipped {} events", id, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    send(tx, OutgoingMessage::success(id, serde_json::Value::Null)).await
}

/// Handle unsubscribe_events command
pub async fn handle_unsubscribe_events(
    conn: &Arc<ActiveConnection>,
    id: u64,
    subscription: u64,
    tx: &mpsc::Sender<OutgoingMessage>,
) -> HandlerResult {
    let removed = conn.subscriptions.write().await.remove(&subscription);
    let reply = match removed {
        Some(cancel_tx) => {
            let _ = cancel_tx.send(());
            OutgoingMessage::success(id, serde_json::Value::Null)
        }
        None => OutgoingMessage::error(id, "not_found", "Subscription not found."),
    };
    send(tx, reply).await
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_app;
    use crate::websocket::connection::ActiveConnection;
    use crate::websocket::dispatch::handle_message;
    use crate::websocket::types::OutgoingMessage;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Client {
        conn: Arc<ActiveConnection>,
        tx: mpsc::Sender<OutgoingMessage>,
        rx: mpsc::Receiver<OutgoingMessage>,
    }

    impl Client {
        fn new(conn: ActiveConnection) -> Self {
            let (tx, rx) = mpsc::channel(16);
            Self {
                conn: Arc::new(conn),
                tx,
                rx,
            }
        }

        async fn send(&mut self, msg: Value) -> Value {
            handle_message(&self.conn, &msg.to_string(), &self.tx)
                .await
                .unwrap();
            self.recv().await
        }

        async fn recv(&mut self) -> Value {
            let msg = self.rx.recv().await.unwrap();
            serde_json::to_value(msg).unwrap()
        }
    }

    #[tokio::test]
    async fn test_ws_items() {
        let app = test_app(true).await;
        let ctx = ha_core::Context::new();
        app.state.shopping_list.add_item("beer", &ctx).await.unwrap();
        app.state.shopping_list.add_item("wine", &ctx).await.unwrap();
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client.send(json!({"id": 5, "type": "shopping_list/items"})).await;
        assert_eq!(msg["success"], true);
        assert_eq!(msg["type"], "result");
        assert_eq!(msg["id"], 5);
        assert_eq!(msg["result"][0]["name"], "beer");
        assert_eq!(msg["result"][1]["name"], "wine");
    }

    #[tokio::test]
    async fn test_ws_add_and_update() {
        let app = test_app(true).await;
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client
            .send(json!({"id": 1, "type": "shopping_list/items/add", "name": "soda"}))
            .await;
        assert_eq!(msg["success"], true);
        let item_id = msg["result"]["id"].as_str().unwrap().to_string();

        let msg = client
            .send(json!({
                "id": 2,
                "type": "shopping_list/items/update",
                "item_id": item_id,
                "complete": true
            }))
            .await;
        assert_eq!(msg["success"], true);
        assert_eq!(msg["result"]["name"], "soda");
        assert_eq!(msg["result"]["complete"], true);
    }

    #[tokio::test]
    async fn test_ws_update_unknown_item() {
        let app = test_app(true).await;
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client
            .send(json!({
                "id": 1,
                "type": "shopping_list/items/update",
                "item_id": "non_existing",
                "name": "soda"
            }))
            .await;
        assert_eq!(msg["success"], false);
        assert_eq!(msg["error"]["code"], "item_not_found");
        assert_eq!(msg["error"]["message"], "Item not found");
    }

    #[tokio::test]
    async fn test_ws_remove_and_clear() {
        let app = test_app(true).await;
        let ctx = ha_core::Context::new();
        let list = app.state.shopping_list.clone();
        let beer = list.add_item("beer", &ctx).await.unwrap();
        let wine = list.add_item("wine", &ctx).await.unwrap();
        list.update_item(
            &wine.id,
            ha_components::ItemUpdate { name: None, complete: Some(true) },
            &ctx,
        )
        .await
        .unwrap();
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client
            .send(json!({"id": 1, "type": "shopping_list/items/remove", "item_id": beer.id}))
            .await;
        assert_eq!(msg["success"], true);

        let msg = client.send(json!({"id": 2, "type": "shopping_list/items/clear"})).await;
        assert_eq!(msg["success"], true);
        assert_eq!(msg["result"], Value::Null);
        assert!(list.items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ws_not_loaded() {
        let app = test_app(false).await;
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client.send(json!({"id": 1, "type": "shopping_list/items"})).await;
        assert_eq!(msg["success"], false);
        assert_eq!(msg["error"]["code"], "not_loaded");
    }

    #[tokio::test]
    async fn test_ws_call_service() {
        let app = test_app(true).await;
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client
            .send(json!({
                "id": 1,
                "type": "call_service",
                "domain": "shopping_list",
                "service": "add_item",
                "service_data": {"name": "Milk"}
            }))
            .await;
        assert_eq!(msg["success"], true);
        assert!(msg["result"]["context"]["id"].is_string());
        assert_eq!(*app.grosh.mutations.lock().unwrap(), vec!["add 7 g-milk"]);

        let msg = client
            .send(json!({
                "id": 2,
                "type": "call_service",
                "domain": "shopping_list",
                "service": "grosh_sync",
                "return_response": true
            }))
            .await;
        assert_eq!(msg["result"]["response"]["items"][0]["name"], "Milk");

        let msg = client
            .send(json!({"id": 3, "type": "call_service", "domain": "light", "service": "turn_on"}))
            .await;
        assert_eq!(msg["success"], false);
        assert_eq!(msg["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_ws_subscribe_shopping_list_updated() {
        let app = test_app(true).await;
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client
            .send(json!({"id": 1, "type": "subscribe_events", "event_type": "shopping_list_updated"}))
            .await;
        assert_eq!(msg["success"], true);

        // The result and the event travel on separate tasks
        let first = client
            .send(json!({"id": 2, "type": "shopping_list/items/add", "name": "soda"}))
            .await;
        let second = client.recv().await;
        let (result, event) = if first["type"] == "event" {
            (second, first)
        } else {
            (first, second)
        };
        assert_eq!(result["id"], 2);
        assert_eq!(result["success"], true);
        assert_eq!(event["id"], 1);
        assert_eq!(event["event"]["event_type"], "shopping_list_updated");
        assert_eq!(event["event"]["data"]["action"], "add");
        assert_eq!(event["event"]["data"]["item"]["name"], "soda");

        let msg = client
            .send(json!({"id": 3, "type": "unsubscribe_events", "subscription": 1}))
            .await;
        assert_eq!(msg["success"], true);
        assert!(client.conn.subscriptions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_ws_ping_and_id_reuse() {
        let app = test_app(false).await;
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client.send(json!({"id": 4, "type": "ping"})).await;
        assert_eq!(msg, json!({"id": 4, "type": "pong"}));

        let msg = client.send(json!({"id": 4, "type": "ping"})).await;
        assert_eq!(msg["success"], false);
        assert_eq!(msg["error"]["code"], "id_reuse");
    }

    #[tokio::test]
    async fn test_ws_unknown_command() {
        let app = test_app(false).await;
        let mut client = Client::new(ActiveConnection::new(app.state.clone()));

        let msg = client.send(json!({"id": 1, "type": "get_states"})).await;
        assert_eq!(msg["success"], false);
        assert_eq!(msg["error"]["code"], "unknown_command");
    }
}
