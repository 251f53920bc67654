//! Home Assistant Rust Server
//!
//! Main entry point: loads `configuration.yaml`, sets up config entries and
//! serves the HTTP API until interrupted.
//!
//! The config directory is the first argument, else `HA_CONFIG_DIR`, else the
//! working directory. `HA_ACCESS_TOKEN` pins the WebSocket access token.

use anyhow::{Context as _, Result};
use ha_api::AppState;
use ha_components::{GroshFactory, ShoppingList};
use ha_config::Configuration;
use ha_config_entries::{ConfigEntries, ConfigEntrySource, ConfigFlowHandler, FlowManager};
use ha_core::{events, Context, Event};
use ha_event_bus::EventBus;
use ha_grosh::{GroshApi, GroshClient};
use ha_service_registry::ServiceRegistry;
use ha_storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// The central Home Assistant instance
pub struct HomeAssistant {
    pub config: Configuration,
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// Service registry for service calls
    pub services: Arc<ServiceRegistry>,
    pub config_entries: Arc<ConfigEntries>,
    pub flows: Arc<FlowManager>,
    pub shopping_list: Arc<ShoppingList>,
}

impl HomeAssistant {
    /// Load configuration and persisted entries, and register components
    pub async fn new(config_dir: PathBuf, grosh_factory: GroshFactory) -> Result<Self> {
        let config = Configuration::load(&config_dir)
            .with_context(|| format!("loading configuration from {}", config_dir.display()))?;

        let storage = Arc::new(Storage::new(&config_dir));
        let bus = Arc::new(EventBus::new());
        let services = Arc::new(ServiceRegistry::new());
        let config_entries = Arc::new(ConfigEntries::new(storage.clone()));
        config_entries
            .load()
            .await
            .context("loading config entries")?;

        let flows = Arc::new(FlowManager::new(config_entries.clone()));
        let shopping_list = ShoppingList::new(
            bus.clone(),
            services.clone(),
            storage,
            config_entries.clone(),
            grosh_factory,
        );
        shopping_list.register(&flows);

        Ok(Self {
            config,
            bus,
            services,
            config_entries,
            flows,
            shopping_list,
        })
    }

    /// Import YAML configuration, set up entries and announce start-up
    pub async fn start(&self) -> Result<()> {
        if let Some(shopping_list) = &self.config.shopping_list {
            let data = serde_json::to_value(shopping_list)?;
            let result = self
                .flows
                .start_flow(
                    ha_components::shopping_list::DOMAIN,
                    ConfigEntrySource::Import,
                    Some(data),
                )
                .await?;
            info!(result = ?result.result_type, reason = ?result.reason, "Imported shopping_list configuration");
        }

        for result in self.config_entries.setup_all().await {
            if let Err(e) = result {
                error!("Config entry setup failed: {}", e);
            }
        }

        self.bus.fire(Event::new(
            events::HOMEASSISTANT_START,
            serde_json::json!({}),
            Context::new(),
        ));
        info!("Home Assistant is running");
        Ok(())
    }

    pub async fn stop(&self) {
        self.bus.fire(Event::new(
            events::HOMEASSISTANT_STOP,
            serde_json::json!({}),
            Context::new(),
        ));
        for entry in self.config_entries.entries() {
            if entry.is_loaded() {
                if let Err(e) = self.config_entries.unload(&entry.entry_id).await {
                    warn!(entry_id = %entry.entry_id, "Unload failed: {}", e);
                }
            }
        }
    }

    pub fn api_state(&self, access_token: Option<String>) -> AppState {
        AppState {
            event_bus: self.bus.clone(),
            service_registry: self.services.clone(),
            config_entries: self.config_entries.clone(),
            config_flow_handler: Some(self.flows.clone()),
            shopping_list: self.shopping_list.clone(),
            access_token: access_token.map(Arc::from),
        }
    }
}

/// Grosh clients sharing one HTTP connection pool
fn grosh_factory() -> Result<GroshFactory> {
    let http = ha_grosh::http_client()?;
    Ok(Arc::new(move |username: &str, password: &str| -> Arc<dyn GroshApi> {
        Arc::new(GroshClient::new(http.clone(), username, password))
    }))
}

fn config_dir() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("HA_CONFIG_DIR"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config_dir = config_dir();
    info!("Starting Home Assistant (Rust) in {}", config_dir.display());

    let hass = HomeAssistant::new(config_dir, grosh_factory()?).await?;
    hass.start().await?;

    let state = hass.api_state(std::env::var("HA_ACCESS_TOKEN").ok());
    let addr = hass.config.http.bind_address();
    let server = tokio::spawn(async move { ha_api::start_server(state, &addr).await });

    tokio::select! {
        result = server => {
            result?.context("API server stopped")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
        }
    }

    hass.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_grosh::{GroshError, GroshResult, Grocery, Household, RemoteItem};
    use tempfile::TempDir;

    /// Grosh account with a single "Home" list
    struct StubAccount {
        accept_login: bool,
    }

    #[async_trait::async_trait]
    impl GroshApi for StubAccount {
        async fn login(&self) -> GroshResult<()> {
            if self.accept_login {
                Ok(())
            } else {
                Err(GroshError::AuthenticationFailed("bad credentials".into()))
            }
        }
        async fn households(&self) -> GroshResult<Vec<Household>> {
            Ok(vec![Household { id: "7".into(), name: "Home".into() }])
        }
        async fn catalog(&self, _: &str) -> GroshResult<Vec<Grocery>> {
            Ok(Vec::new())
        }
        async fn current_items(&self, _: &str, _: &str) -> GroshResult<Vec<RemoteItem>> {
            Ok(Vec::new())
        }
        async fn add_item(&self, _: &str, _: &str) -> GroshResult<Option<String>> {
            Ok(None)
        }
        async fn mark_bought(&self, _: &str, _: &str) -> GroshResult<()> {
            Ok(())
        }
        async fn remove_item(&self, _: &str, _: &str) -> GroshResult<()> {
            Ok(())
        }
    }

    fn stub(accept_login: bool) -> GroshFactory {
        Arc::new(move |_: &str, _: &str| -> Arc<dyn GroshApi> {
            Arc::new(StubAccount { accept_login })
        })
    }

    fn rejecting() -> GroshFactory {
        stub(false)
    }

    #[tokio::test]
    async fn test_start_without_configuration() {
        let dir = TempDir::new().unwrap();
        let hass = HomeAssistant::new(dir.path().to_path_buf(), rejecting())
            .await
            .unwrap();
        let mut started = hass.bus.subscribe(events::HOMEASSISTANT_START);

        hass.start().await.unwrap();

        assert!(started.recv().await.is_ok());
        assert!(!hass.shopping_list.is_loaded().await);
        assert_eq!(hass.config.http.server_port, 8123);
    }

    #[tokio::test]
    async fn test_rejected_import_creates_no_entry() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("configuration.yaml"),
            "shopping_list:\n  grosh_username: anna\n  grosh_password: wrong\n",
        )
        .unwrap();

        let hass = HomeAssistant::new(dir.path().to_path_buf(), rejecting())
            .await
            .unwrap();
        hass.start().await.unwrap();

        assert!(hass.config_entries.is_empty());
        assert!(!hass.shopping_list.is_loaded().await);
    }

    #[tokio::test]
    async fn test_import_loads_entry_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("configuration.yaml"),
            "shopping_list:\n  grosh_username: anna\n  grosh_password: secret\n  grosh_list: Home\n",
        )
        .unwrap();

        let hass = HomeAssistant::new(dir.path().to_path_buf(), stub(true))
            .await
            .unwrap();
        hass.start().await.unwrap();

        let entries = hass.config_entries.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_loaded());
        assert!(entries[0].reason.is_none());
        assert!(hass.shopping_list.is_loaded().await);
        assert_eq!(hass.shopping_list.list_id().await.as_deref(), Some("7"));

        // Nothing left to set up after the import
        assert!(hass.config_entries.setup_all().await.is_empty());
    }
}
