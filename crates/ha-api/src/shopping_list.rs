//! Shopping list REST views
//!
//! - GET  /api/shopping_list
//! - POST /api/shopping_list/item
//! - POST /api/shopping_list/item/{item_id}
//! - POST /api/shopping_list/clear_completed

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ha_components::{ItemUpdate, ShoppingListError};
use ha_core::Context;
use serde::Deserialize;
use tracing::warn;

use crate::{json_message, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateItem {
    pub name: String,
}

/// HTTP response for a failed shopping list operation
pub(crate) fn error_response(err: ShoppingListError) -> Response {
    match err {
        ShoppingListError::NotLoaded => {
            json_message(StatusCode::SERVICE_UNAVAILABLE, "Shopping list is not loaded.")
        }
        ShoppingListError::ItemNotFound(_) => json_message(StatusCode::NOT_FOUND, "Item not found"),
        ShoppingListError::InvalidItem(_) => json_message(StatusCode::BAD_REQUEST, "Item not found"),
        err @ (ShoppingListError::UnknownList(_) | ShoppingListError::NoListSelected) => {
            json_message(StatusCode::BAD_REQUEST, err.to_string())
        }
        err => {
            warn!("Shopping list request failed: {}", err);
            json_message(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// GET /api/shopping_list
pub async fn get_items(State(state): State<AppState>) -> Response {
    match state.shopping_list.items().await {
        Ok(items) => Json(items).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/shopping_list/item
pub async fn create_item(
    State(state): State<AppState>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    let request = body.and_then(|Json(v)| serde_json::from_value::<CreateItem>(v).ok());
    let Some(CreateItem { name }) = request else {
        return json_message(StatusCode::BAD_REQUEST, "Message format incorrect");
    };

    match state.shopping_list.add_item(&name, &Context::new()).await {
        Ok(item) => Json(item).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/shopping_list/item/{item_id}
///
/// Accepts `name` and `complete`; anything else is rejected as a bad request.
pub async fn update_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    let update = match body {
        Some(Json(value)) => serde_json::from_value::<ItemUpdate>(value).ok(),
        None => Some(ItemUpdate::default()),
    };
    let Some(update) = update else {
        return json_message(StatusCode::BAD_REQUEST, "Item not found");
    };

    match state
        .shopping_list
        .update_item(&item_id, update, &Context::new())
        .await
    {
        Ok(item) => Json(item).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/shopping_list/clear_completed
pub async fn clear_completed(State(state): State<AppState>) -> Response {
    match state.shopping_list.clear_completed(&Context::new()).await {
        Ok(_) => json_message(StatusCode::OK, "Cleared completed items."),
        Err(e) => error_response(e),
    }
}
