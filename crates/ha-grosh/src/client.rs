//! HTTP client for the Grosh API
//!
//! All requests use HTTP basic auth. Endpoints, relative to [`GROSH_URL`]:
//!
//! | Operation      | Request                                        |
//! |----------------|------------------------------------------------|
//! | login          | `GET /`                                        |
//! | households     | `GET /users/me/households`                     |
//! | catalog        | `GET /groceries?locale=..`                     |
//! | current items  | `GET /households/{id}/current?locale=..`       |
//! | add item       | `PUT /households/{id}/current/{grocery_id}`    |
//! | mark bought    | `PUT /households/{id}/bought/{entry_id}`       |
//! | remove item    | `DELETE /households/{id}/current/{entry_id}`   |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::{GroshError, GroshResult};
use crate::models::{CategoryGroup, Grocery, Household, RemoteItem};

pub const GROSH_URL: &str = "https://gr1.compellingsoftware.com/edge";

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The Grosh operations the shopping list needs
#[async_trait]
pub trait GroshApi: Send + Sync {
    /// Check the credentials
    async fn login(&self) -> GroshResult<()>;

    async fn households(&self) -> GroshResult<Vec<Household>>;

    /// Grocery catalog localized for `locale`
    async fn catalog(&self, locale: &str) -> GroshResult<Vec<Grocery>>;

    /// Entries of a household's list, flattened across categories
    async fn current_items(&self, household_id: &str, locale: &str) -> GroshResult<Vec<RemoteItem>>;

    /// Put a grocery on the list; returns the new entry id when Grosh reports one
    async fn add_item(&self, household_id: &str, grocery_id: &str) -> GroshResult<Option<String>>;

    async fn mark_bought(&self, household_id: &str, entry_id: &str) -> GroshResult<()>;

    async fn remove_item(&self, household_id: &str, entry_id: &str) -> GroshResult<()>;
}

/// Shared HTTP client with the request timeout applied
pub fn http_client() -> GroshResult<Client> {
    Ok(Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

#[derive(Clone)]
pub struct GroshClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for GroshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroshClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl GroshClient {
    pub fn new(http: Client, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http,
            base_url: GROSH_URL.to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%method, %url, "Grosh request");
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder) -> GroshResult<Response> {
        check_response(request.send().await?).await
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> GroshResult<T> {
        Ok(self.send(request).await?.json().await?)
    }
}

/// Map a Grosh response onto success or a [`GroshError`]
async fn check_response(response: Response) -> GroshResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(GroshError::NotFound(response.url().to_string()));
    }

    let reason = status.canonical_reason().unwrap_or("unknown status").to_string();
    let body = response.text().await.unwrap_or_default();
    let json: Option<serde_json::Value> = serde_json::from_str(&body).ok();

    // Grosh reports application errors as {"errorCode": .., "error": ".."}
    let message = json
        .as_ref()
        .filter(|v| v.get("errorCode").is_some_and(|c| !c.is_null()))
        .and_then(|v| v.get("error"))
        .and_then(|e| e.as_str())
        .map(str::to_string)
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or(reason);

    if status == StatusCode::UNAUTHORIZED {
        return Err(GroshError::AuthenticationFailed(message));
    }

    Err(GroshError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl GroshApi for GroshClient {
    #[instrument(skip(self), fields(username = %self.username))]
    async fn login(&self) -> GroshResult<()> {
        self.send(self.request(Method::GET, "")).await?;
        debug!("Grosh login accepted");
        Ok(())
    }

    async fn households(&self) -> GroshResult<Vec<Household>> {
        self.get_json(self.request(Method::GET, "/users/me/households"))
            .await
    }

    async fn catalog(&self, locale: &str) -> GroshResult<Vec<Grocery>> {
        let request = self
            .request(Method::GET, "/groceries")
            .query(&[("locale", locale)]);
        self.get_json(request).await
    }

    async fn current_items(&self, household_id: &str, locale: &str) -> GroshResult<Vec<RemoteItem>> {
        let request = self
            .request(Method::GET, &format!("/households/{}/current", household_id))
            .query(&[("locale", locale)]);
        let groups: Vec<CategoryGroup> = self.get_json(request).await?;
        Ok(groups.into_iter().flat_map(|g| g.groceries).collect())
    }

    async fn add_item(&self, household_id: &str, grocery_id: &str) -> GroshResult<Option<String>> {
        let endpoint = format!("/households/{}/current/{}", household_id, grocery_id);
        let body = self.send(self.request(Method::PUT, &endpoint)).await?.text().await?;

        let entry_id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| match v.get("id")? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Ok(entry_id)
    }

    async fn mark_bought(&self, household_id: &str, entry_id: &str) -> GroshResult<()> {
        let endpoint = format!("/households/{}/bought/{}", household_id, entry_id);
        self.send(self.request(Method::PUT, &endpoint)).await?;
        Ok(())
    }

    async fn remove_item(&self, household_id: &str, entry_id: &str) -> GroshResult<()> {
        let endpoint = format!("/households/{}/current/{}", household_id, entry_id);
        self.send(self.request(Method::DELETE, &endpoint)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// "anna:secret"
    const AUTH: &str = "Basic YW5uYTpzZWNyZXQ=";

    type Log = Arc<Mutex<Vec<String>>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(AUTH)
    }

    async fn root(headers: HeaderMap) -> impl IntoResponse {
        if authorized(&headers) {
            (StatusCode::OK, Json(json!({"id": "u1"})))
        } else {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"errorCode": 401, "error": "Wrong password"})),
            )
        }
    }

    async fn households() -> Json<serde_json::Value> {
        Json(json!([{"id": "h1", "name": "Home"}, {"id": 2, "name": "Office"}]))
    }

    async fn groceries(
        State(log): State<Log>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        log.lock()
            .unwrap()
            .push(format!("catalog locale={}", query.get("locale").cloned().unwrap_or_default()));
        Json(json!([{"id": "g1", "name": "Milch"}]))
    }

    async fn current(
        State(log): State<Log>,
        Path(household): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        log.lock().unwrap().push(format!(
            "current {} locale={}",
            household,
            query.get("locale").cloned().unwrap_or_default()
        ));
        if household == "locked" {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"errorCode": 12, "error": "List is locked"})),
            );
        }
        (
            StatusCode::OK,
            Json(json!([
                {"category": "Dairy", "groceries": [
                    {"id": "e1", "name": "Milk", "groceryId": "g1", "bought": false}
                ]},
                {"category": "Bakery", "groceries": [
                    {"id": "e2", "name": "Bread", "groceryId": "g2", "bought": true, "amount": 2}
                ]}
            ])),
        )
    }

    async fn add(State(log): State<Log>, Path((household, grocery)): Path<(String, String)>) -> Json<serde_json::Value> {
        log.lock().unwrap().push(format!("add {} {}", household, grocery));
        Json(json!({"id": "e9"}))
    }

    async fn remove(State(log): State<Log>, Path((household, entry)): Path<(String, String)>) -> StatusCode {
        log.lock().unwrap().push(format!("remove {} {}", household, entry));
        StatusCode::NO_CONTENT
    }

    async fn bought(State(log): State<Log>, Path((household, entry)): Path<(String, String)>) -> StatusCode {
        log.lock().unwrap().push(format!("bought {} {}", household, entry));
        StatusCode::NO_CONTENT
    }

    async fn serve() -> (String, Log) {
        let log: Log = Arc::default();
        let app = Router::new()
            .route("/", get(root))
            .route("/users/me/households", get(households))
            .route("/groceries", get(groceries))
            .route("/households/:id/current", get(current))
            .route("/households/:id/current/:item", put(add).delete(remove))
            .route("/households/:id/bought/:item", put(bought))
            .with_state(log.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), log)
    }

    fn client(base_url: &str, password: &str) -> GroshClient {
        GroshClient::new(http_client().unwrap(), "anna", password).with_base_url(base_url)
    }

    #[tokio::test]
    async fn test_login() {
        let (url, _log) = serve().await;

        client(&url, "secret").login().await.unwrap();

        let err = client(&url, "wrong").login().await.unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("Wrong password"));
    }

    #[tokio::test]
    async fn test_households_and_catalog() {
        let (url, log) = serve().await;
        let grosh = client(&url, "secret");

        let households = grosh.households().await.unwrap();
        assert_eq!(households[1].id, "2");

        let catalog = grosh.catalog("de-DE").await.unwrap();
        assert_eq!(catalog[0].name, "Milch");
        assert_eq!(log.lock().unwrap().as_slice(), ["catalog locale=de-DE"]);
    }

    #[tokio::test]
    async fn test_current_items_flattened() {
        let (url, log) = serve().await;
        let grosh = client(&url, "secret");

        let items = grosh.current_items("h1", "nb-NO").await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Milk", "Bread"]);
        assert!(items[1].bought);
        assert_eq!(log.lock().unwrap().as_slice(), ["current h1 locale=nb-NO"]);
    }

    #[tokio::test]
    async fn test_mutations() {
        let (url, log) = serve().await;
        let grosh = client(&url, "secret");

        assert_eq!(grosh.add_item("h1", "g1").await.unwrap().as_deref(), Some("e9"));
        grosh.mark_bought("h1", "e1").await.unwrap();
        grosh.remove_item("h1", "e2").await.unwrap();

        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["add h1 g1", "bought h1 e1", "remove h1 e2"]
        );
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let (url, _log) = serve().await;
        let grosh = client(&url, "secret");

        match grosh.current_items("locked", "en-US").await {
            Err(GroshError::Api { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "List is locked");
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            grosh.mark_bought("h1", "missing/extra").await,
            Err(GroshError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let grosh = client(&format!("http://{}", addr), "secret");
        assert!(matches!(grosh.login().await, Err(GroshError::Http(_))));
    }
}
