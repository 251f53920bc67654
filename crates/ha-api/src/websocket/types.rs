//! WebSocket message types
//!
//! Defines all incoming and outgoing WebSocket message types.

use serde::{Deserialize, Serialize};

// =============================================================================
// Incoming Messages
// =============================================================================

/// Incoming WebSocket message from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    Auth {
        access_token: Option<String>,
        #[serde(default)]
        api_password: Option<String>,
    },
    CallService {
        id: u64,
        domain: String,
        service: String,
        #[serde(default)]
        service_data: Option<serde_json::Value>,
        #[serde(default)]
        return_response: bool,
    },
    Ping {
        id: u64,
    },
    #[serde(rename = "shopping_list/items")]
    ShoppingListItems {
        id: u64,
    },
    #[serde(rename = "shopping_list/items/add")]
    ShoppingListAdd {
        id: u64,
        name: String,
    },
    #[serde(rename = "shopping_list/items/update")]
    ShoppingListUpdate {
        id: u64,
        item_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        complete: Option<bool>,
    },
    #[serde(rename = "shopping_list/items/remove")]
    ShoppingListRemove {
        id: u64,
        item_id: String,
    },
    #[serde(rename = "shopping_list/items/clear")]
    ShoppingListClear {
        id: u64,
    },
    SubscribeEvents {
        id: u64,
        #[serde(default)]
        event_type: Option<String>,
    },
    UnsubscribeEvents {
        id: u64,
        subscription: u64,
    },
}

// =============================================================================
// Outgoing Messages
// =============================================================================

/// Outgoing WebSocket message to client
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    AuthRequired(AuthRequiredMessage),
    AuthOk(AuthOkMessage),
    AuthInvalid(AuthInvalidMessage),
    Pong(PongMessage),
    Result(ResultMessage),
    Event(EventMessage),
}

impl OutgoingMessage {
    /// Successful `result` message
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        OutgoingMessage::Result(ResultMessage {
            id,
            msg_type: "result",
            success: true,
            result: Some(result),
            error: None,
        })
    }

    /// Failed `result` message
    pub fn error(id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        OutgoingMessage::Result(ResultMessage {
            id,
            msg_type: "result",
            success: false,
            result: None,
            error: Some(ErrorInfo {
                code: code.into(),
                message: message.into(),
            }),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AuthRequiredMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub ha_version: String,
}

#[derive(Debug, Serialize)]
pub struct AuthOkMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub ha_version: String,
}

#[derive(Debug, Serialize)]
pub struct AuthInvalidMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct PongMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ResultMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub success: bool,
    /// Present as `null` for commands without a result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct EventMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub event: serde_json::Value,
}
