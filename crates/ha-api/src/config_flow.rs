//! Config entry and config flow REST views
//!
//! Flows are driven through [`ConfigFlowHandler`], entries through
//! [`ha_config_entries::ConfigEntries`].

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ha_config_entries::{ConfigEntriesError, ConfigEntrySource, ConfigFlowHandler, FlowError};
use serde::Deserialize;
use tracing::{error, info};

use crate::{json_message, AppState};

/// Request to start a config flow
#[derive(Deserialize)]
pub struct StartFlowRequest {
    pub handler: String,
}

fn flow_handler(state: &AppState) -> Result<Arc<dyn ConfigFlowHandler>, Response> {
    state.config_flow_handler.clone().ok_or_else(|| {
        json_message(
            StatusCode::SERVICE_UNAVAILABLE,
            "Config flow handler not available",
        )
    })
}

fn flow_error_response(err: FlowError) -> Response {
    match err {
        FlowError::UnknownHandler(_) => json_message(
            StatusCode::NOT_FOUND,
            format!("Invalid handler specified: {}", err),
        ),
        FlowError::UnknownFlow(_) => json_message(
            StatusCode::NOT_FOUND,
            format!("Invalid flow specified: {}", err),
        ),
        FlowError::Entries(e) => {
            error!("Config flow failed: {}", e);
            json_message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ==================== Config entries ====================

/// GET /api/config/config_entries/entry
pub async fn get_entries(State(state): State<AppState>) -> Json<Vec<serde_json::Value>> {
    Json(
        state
            .config_entries
            .entries()
            .iter()
            .map(|entry| entry.to_api_json())
            .collect(),
    )
}

/// DELETE /api/config/config_entries/entry/{entry_id}
pub async fn delete_entry(State(state): State<AppState>, Path(entry_id): Path<String>) -> Response {
    info!("HTTP DELETE config entry: {}", entry_id);

    match state.config_entries.remove(&entry_id).await {
        Ok(_) => Json(serde_json::json!({ "require_restart": false })).into_response(),
        Err(ConfigEntriesError::NotFound(_)) => {
            json_message(StatusCode::NOT_FOUND, "Invalid entry specified")
        }
        Err(e) => {
            error!("Failed to remove config entry {}: {}", entry_id, e);
            json_message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ==================== Config flows ====================

/// GET /api/config/config_entries/flow - Flows in progress
pub async fn list_flows(State(state): State<AppState>) -> Response {
    match flow_handler(&state) {
        Ok(handler) => Json(handler.list_flows().await).into_response(),
        Err(response) => response,
    }
}

/// POST /api/config/config_entries/flow - Start a new config flow
pub async fn start_flow(
    State(state): State<AppState>,
    Json(request): Json<StartFlowRequest>,
) -> Response {
    info!("HTTP POST start config flow for handler: {}", request.handler);
    let handler = match flow_handler(&state) {
        Ok(handler) => handler,
        Err(response) => return response,
    };

    match handler
        .start_flow(&request.handler, ConfigEntrySource::User, None)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => flow_error_response(e),
    }
}

/// GET /api/config/config_entries/flow/{flow_id} - Current step of a flow
pub async fn get_flow(State(state): State<AppState>, Path(flow_id): Path<String>) -> Response {
    let handler = match flow_handler(&state) {
        Ok(handler) => handler,
        Err(response) => return response,
    };

    match handler.progress_flow(&flow_id, None).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => flow_error_response(e),
    }
}

/// POST /api/config/config_entries/flow/{flow_id} - Submit a step
///
/// An empty object is a submission; only a missing body re-shows the form.
pub async fn progress_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    info!("HTTP POST progress config flow: {}", flow_id);
    let handler = match flow_handler(&state) {
        Ok(handler) => handler,
        Err(response) => return response,
    };

    let user_input = body.map(|Json(input)| input);
    match handler.progress_flow(&flow_id, user_input).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => flow_error_response(e),
    }
}

/// DELETE /api/config/config_entries/flow/{flow_id} - Cancel a flow
pub async fn cancel_flow(State(state): State<AppState>, Path(flow_id): Path<String>) -> Response {
    info!("HTTP DELETE (cancel) config flow: {}", flow_id);
    let handler = match flow_handler(&state) {
        Ok(handler) => handler,
        Err(response) => return response,
    };

    match handler.abort_flow(&flow_id).await {
        Ok(()) => json_message(StatusCode::OK, "Flow aborted"),
        Err(e) => flow_error_response(e),
    }
}
