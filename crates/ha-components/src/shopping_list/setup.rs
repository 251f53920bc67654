//! Config entry lifecycle of the shopping list

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use ha_config::DEFAULT_LOCALE;
use ha_config_entries::{ConfigEntry, ConfigFlow, EntryHandler, FlowManager, UpdateListener};
use ha_core::Context;
use tracing::{info, warn};

use super::component::ShoppingList;
use super::config_flow::GroshConfigFlow;
use super::data::ShoppingData;
use super::error::{ShoppingListError, ShoppingListResult};
use super::{services, UpdateAction, CONF_LIST_ID, CONF_LOCALE, CONF_PASSWORD, CONF_USERNAME, DOMAIN};

impl ShoppingList {
    /// Hook the component into config entries and config flows
    pub fn register(self: &Arc<Self>, flows: &FlowManager) {
        self.entries
            .register_handler(DOMAIN, Arc::new(EntryLifecycle(Arc::downgrade(self))));

        let entries = self.entries.clone();
        let factory = self.grosh_factory.clone();
        flows.register_flow(
            DOMAIN,
            Arc::new(move || -> Box<dyn ConfigFlow> {
                Box::new(GroshConfigFlow::new(entries.clone(), factory.clone()))
            }),
        );
    }

    async fn setup_entry(self: &Arc<Self>, entry: &ConfigEntry) -> ShoppingListResult<()> {
        let (username, password) = credentials(entry)?;
        let locale = entry.data_str(CONF_LOCALE).unwrap_or(DEFAULT_LOCALE);

        let grosh = self.connect(username, password, locale).await?;
        let mut data = ShoppingData {
            entry_id: entry.entry_id.clone(),
            items: self.load_items().await,
            grosh,
        };

        if let Some(list_id) = entry.option_str(CONF_LIST_ID) {
            // Persisted entry ids belong to the stored list
            data.grosh.list_id = Some(list_id.to_string());
            match data.select_list(list_id).await {
                Ok(_) => {
                    if let Err(err) = data.sync().await {
                        warn!("Initial Grosh sync failed: {}", err);
                    }
                }
                Err(err @ ShoppingListError::UnknownList(_)) => {
                    data.grosh.list_id = None;
                    warn!("Stored Grosh list is gone: {}", err);
                }
                Err(err) => warn!("Keeping Grosh list {} unverified: {}", list_id, err),
            }
        }

        self.save(&data.items).await;
        info!(
            items = data.items.len(),
            list_id = ?data.grosh.list_id,
            "Shopping list loaded"
        );
        *self.data.lock().await = Some(data);

        services::register(self);
        self.entries
            .add_update_listener(&entry.entry_id, options_listener(Arc::downgrade(self)));
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) {
        let mut guard = self.data.lock().await;
        if guard.as_ref().map(|d| d.entry_id.as_str()) == Some(entry.entry_id.as_str()) {
            if let Some(data) = guard.take() {
                self.save(&data.items).await;
            }
        }
        let removed = self.services.unregister_domain(DOMAIN);
        info!(services = removed, "Shopping list unloaded");
    }

    /// React to changed entry options
    ///
    /// A new locale logs in again and reloads the catalog; a new `list_id`
    /// switches list and pulls it.
    pub(crate) async fn options_updated(&self, entry: ConfigEntry) {
        let mut guard = self.data.lock().await;
        let Some(data) = guard.as_mut().filter(|d| d.entry_id == entry.entry_id) else {
            return;
        };

        let locale = entry
            .option_str(CONF_LOCALE)
            .or_else(|| entry.data_str(CONF_LOCALE))
            .unwrap_or(DEFAULT_LOCALE);
        if locale != data.grosh.locale {
            let reconnected = match credentials(&entry) {
                Ok((username, password)) => self.connect(username, password, locale).await,
                Err(err) => Err(err),
            };
            match reconnected {
                Ok(mut grosh) => {
                    grosh.list_id = data.grosh.list_id.take();
                    data.grosh = grosh;
                    info!(locale, "Grosh locale changed");
                }
                Err(err) => warn!(locale, "Keeping previous locale: {}", err),
            }
        }

        let Some(list_id) = entry.option_str(CONF_LIST_ID) else {
            return;
        };
        if data.grosh.list_id.as_deref() == Some(list_id) {
            return;
        }
        match data.select_list(list_id).await {
            Ok(_) => {
                if let Err(err) = data.sync().await {
                    warn!("Sync after list change failed: {}", err);
                }
                self.save(&data.items).await;
                self.notify(UpdateAction::Sync, None, &Context::new());
            }
            Err(err) => warn!("Cannot switch to Grosh list {}: {}", list_id, err),
        }
    }
}

fn credentials(entry: &ConfigEntry) -> ShoppingListResult<(&str, &str)> {
    match (entry.data_str(CONF_USERNAME), entry.data_str(CONF_PASSWORD)) {
        (Some(username), Some(password)) => Ok((username, password)),
        _ => Err(ShoppingListError::MissingCredentials),
    }
}

fn options_listener(list: Weak<ShoppingList>) -> UpdateListener {
    Arc::new(move |entry: ConfigEntry| -> BoxFuture<'static, ()> {
        let list = list.clone();
        async move {
            if let Some(list) = list.upgrade() {
                list.options_updated(entry).await;
            }
        }
        .boxed()
    })
}

/// Entry handler registered for the `shopping_list` domain
///
/// Holds a weak reference since the component itself owns the entries manager.
struct EntryLifecycle(Weak<ShoppingList>);

impl EntryLifecycle {
    fn list(&self) -> Result<Arc<ShoppingList>, String> {
        self.0
            .upgrade()
            .ok_or_else(|| "shopping list component was dropped".to_string())
    }
}

#[async_trait]
impl EntryHandler for EntryLifecycle {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        let list = self.list()?;
        list.setup_entry(entry).await.map_err(|e| e.to_string())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        self.list()?.unload_entry(entry).await;
        Ok(())
    }
}
