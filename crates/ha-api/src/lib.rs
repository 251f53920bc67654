//! REST and WebSocket API
//!
//! Serves the Home Assistant style HTTP API with axum: service calls, the
//! shopping list views, config flows and the WebSocket command channel.
//! Based on: https://developers.home-assistant.io/docs/api/rest
//!           https://developers.home-assistant.io/docs/api/websocket

mod config_flow;
mod shopping_list;
mod websocket;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ha_components::ShoppingList;
use ha_config_entries::{ConfigEntries, ConfigFlowHandler};
use ha_core::Context;
use ha_event_bus::SharedEventBus;
use ha_service_registry::{ServiceError, SharedServiceRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub event_bus: SharedEventBus,
    pub service_registry: SharedServiceRegistry,
    pub config_entries: Arc<ConfigEntries>,
    /// Config flow handler for integration setup
    pub config_flow_handler: Option<Arc<dyn ConfigFlowHandler>>,
    pub shopping_list: Arc<ShoppingList>,
    /// Token WebSocket clients must present; any token is accepted when unset
    pub access_token: Option<Arc<str>>,
}

#[derive(Serialize)]
struct ApiStatus {
    message: &'static str,
}

/// Services of one domain, as listed by GET /api/services
#[derive(Serialize)]
pub struct ServiceResponse {
    pub domain: String,
    pub services: BTreeMap<String, ServiceDescription>,
}

#[derive(Serialize)]
pub struct ServiceDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// `{"message": ...}` with the given status
pub(crate) fn json_message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
        }),
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // WebSocket endpoint
        .route("/api/websocket", get(websocket::ws_handler))
        // Status endpoint
        .route("/api/", get(api_status))
        // Service endpoints
        .route("/api/services", get(get_services))
        .route("/api/services/:domain/:service", post(call_service))
        // Shopping list views
        .route("/api/shopping_list", get(shopping_list::get_items))
        .route("/api/shopping_list/item", post(shopping_list::create_item))
        .route("/api/shopping_list/item/:item_id", post(shopping_list::update_item))
        .route(
            "/api/shopping_list/clear_completed",
            post(shopping_list::clear_completed),
        )
        // Config entries and flows
        .route("/api/config/config_entries/entry", get(config_flow::get_entries))
        .route(
            "/api/config/config_entries/entry/:entry_id",
            axum::routing::delete(config_flow::delete_entry),
        )
        .route(
            "/api/config/config_entries/flow",
            get(config_flow::list_flows).post(config_flow::start_flow),
        )
        .route(
            "/api/config/config_entries/flow/:flow_id",
            get(config_flow::get_flow)
                .post(config_flow::progress_flow)
                .delete(config_flow::cancel_flow),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_server(state: AppState, addr: &str) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router).await
}

// ==================== Handlers ====================

/// GET /api/ - Returns API status
async fn api_status() -> Json<ApiStatus> {
    Json(ApiStatus {
        message: "API running.",
    })
}

/// GET /api/services - Returns registered services grouped by domain
async fn get_services(State(state): State<AppState>) -> Json<Vec<ServiceResponse>> {
    let responses = state
        .service_registry
        .all_services()
        .into_iter()
        .map(|(domain, descriptions)| {
            let services = descriptions
                .into_iter()
                .map(|desc| {
                    let fields = schema_fields(desc.schema.as_ref());
                    (
                        desc.service,
                        ServiceDescription {
                            name: desc.name,
                            description: desc.description,
                            fields,
                        },
                    )
                })
                .collect();
            ServiceResponse { domain, services }
        })
        .collect();

    Json(responses)
}

/// Field listing derived from a JSON schema's properties
fn schema_fields(schema: Option<&serde_json::Value>) -> BTreeMap<String, serde_json::Value> {
    let Some(schema) = schema else {
        return BTreeMap::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| {
            props
                .keys()
                .map(|name| {
                    let field = serde_json::json!({ "required": required.contains(&name.as_str()) });
                    (name.clone(), field)
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn service_error_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::NotFound { .. }
        | ServiceError::InvalidData(_)
        | ServiceError::ResponseNotSupported => StatusCode::BAD_REQUEST,
        ServiceError::CallFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/services/{domain}/{service} - Calls a service
///
/// With `?return_response` the service response is returned alongside the
/// (always empty) list of changed states.
async fn call_service(
    State(state): State<AppState>,
    Path((domain, service)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    let service_data = body.map(|Json(data)| data).unwrap_or_default();
    let return_response = query.contains_key("return_response");

    match state
        .service_registry
        .call(&domain, &service, service_data, Context::new(), return_response)
        .await
    {
        Ok(response) if return_response => Json(serde_json::json!({
            "changed_states": [],
            "service_response": response,
        }))
        .into_response(),
        Ok(_) => Json(Vec::<serde_json::Value>::new()).into_response(),
        Err(e) => {
            warn!(%domain, %service, "Service call failed: {}", e);
            json_message(service_error_status(&e), format!("Service call failed: {}", e))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{body_json, test_app};
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_api_status() {
        let app = test_app(false).await;
        let response = create_router(app.state)
            .oneshot(Request::builder().uri("/api/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "API running.");
    }

    #[tokio::test]
    async fn test_get_services_lists_shopping_list() {
        let app = test_app(true).await;
        let response = create_router(app.state)
            .oneshot(Request::builder().uri("/api/services").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let domain = &json[0];
        assert_eq!(domain["domain"], "shopping_list");
        assert_eq!(domain["services"]["add_item"]["fields"]["name"]["required"], true);
        assert!(domain["services"]["grosh_sync"].is_object());
    }

    #[tokio::test]
    async fn test_call_service() {
        let app = test_app(true).await;
        let response = create_router(app.state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/services/shopping_list/add_item")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "Milk"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
        assert_eq!(app.state.shopping_list.items().await.unwrap()[0].name, "Milk");
        assert_eq!(*app.grosh.mutations.lock().unwrap(), vec!["add 7 g-milk"]);
    }

    #[tokio::test]
    async fn test_call_service_with_response() {
        let app = test_app(true).await;
        let response = create_router(app.state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/services/shopping_list/grosh_sync?return_response")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["changed_states"], serde_json::json!([]));
        assert_eq!(json["service_response"]["items"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_call_unknown_service() {
        let app = test_app(false).await;
        let response = create_router(app.state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/services/shopping_list/grosh_sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_schema_fields() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "note": {"type": "string"}},
            "required": ["name"]
        });
        let fields = schema_fields(Some(&schema));
        assert_eq!(fields["name"]["required"], true);
        assert_eq!(fields["note"]["required"], false);
        assert!(schema_fields(None).is_empty());
    }
}
