//! The shopping list handle shared by services, the HTTP API and setup

use std::sync::Arc;

use ha_config_entries::{ConfigEntries, ConfigEntryUpdate};
use ha_core::Context;
use ha_event_bus::SharedEventBus;
use ha_grosh::{GroshApi, Household};
use ha_service_registry::SharedServiceRegistry;
use ha_storage::Storage;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::data::{GroshLink, ShoppingData};
use super::error::{ShoppingListError, ShoppingListResult};
use super::item::{ItemUpdate, ShoppingListItem};
use super::{ShoppingListUpdated, UpdateAction, CONF_LIST_ID, PERSISTENCE};

/// Builds a Grosh client from a username and password
pub type GroshFactory = Arc<dyn Fn(&str, &str) -> Arc<dyn GroshApi> + Send + Sync>;

/// The shopping list of the loaded config entry
///
/// All list state sits behind one async mutex that is held across remote
/// calls, so mutations and syncs run one at a time.
pub struct ShoppingList {
    pub(crate) bus: SharedEventBus,
    pub(crate) services: SharedServiceRegistry,
    pub(crate) storage: Arc<Storage>,
    pub(crate) entries: Arc<ConfigEntries>,
    pub(crate) grosh_factory: GroshFactory,
    pub(crate) data: Mutex<Option<ShoppingData>>,
}

impl ShoppingList {
    pub fn new(
        bus: SharedEventBus,
        services: SharedServiceRegistry,
        storage: Arc<Storage>,
        entries: Arc<ConfigEntries>,
        grosh_factory: GroshFactory,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            services,
            storage,
            entries,
            grosh_factory,
            data: Mutex::new(None),
        })
    }

    pub async fn is_loaded(&self) -> bool {
        self.data.lock().await.is_some()
    }

    /// Id of the selected Grosh list
    pub async fn list_id(&self) -> Option<String> {
        self.data
            .lock()
            .await
            .as_ref()
            .and_then(|data| data.grosh.list_id.clone())
    }

    pub async fn items(&self) -> ShoppingListResult<Vec<ShoppingListItem>> {
        let guard = self.data.lock().await;
        let data = guard.as_ref().ok_or(ShoppingListError::NotLoaded)?;
        Ok(data.items.clone())
    }

    pub async fn add_item(&self, name: &str, context: &Context) -> ShoppingListResult<ShoppingListItem> {
        let mut guard = self.data.lock().await;
        let data = guard.as_mut().ok_or(ShoppingListError::NotLoaded)?;

        let item = data.add(name).await?;
        self.save(&data.items).await;
        self.notify(UpdateAction::Add, Some(item.clone()), context);
        Ok(item)
    }

    pub async fn update_item(
        &self,
        item_id: &str,
        update: ItemUpdate,
        context: &Context,
    ) -> ShoppingListResult<ShoppingListItem> {
        let mut guard = self.data.lock().await;
        let data = guard.as_mut().ok_or(ShoppingListError::NotLoaded)?;

        let item = data.update(item_id, update).await?;
        self.save(&data.items).await;
        self.notify(UpdateAction::Update, Some(item.clone()), context);
        Ok(item)
    }

    pub async fn remove_item(&self, item_id: &str, context: &Context) -> ShoppingListResult<ShoppingListItem> {
        let mut guard = self.data.lock().await;
        let data = guard.as_mut().ok_or(ShoppingListError::NotLoaded)?;

        let item = data.remove(item_id).await?;
        self.save(&data.items).await;
        self.notify(UpdateAction::Remove, Some(item.clone()), context);
        Ok(item)
    }

    pub async fn remove_by_name(&self, name: &str, context: &Context) -> ShoppingListResult<ShoppingListItem> {
        let item_id = self.item_id_by_name(name).await?;
        self.remove_item(&item_id, context).await
    }

    /// Complete or reopen the item called `name`
    pub async fn set_complete_by_name(
        &self,
        name: &str,
        complete: bool,
        context: &Context,
    ) -> ShoppingListResult<ShoppingListItem> {
        let item_id = self.item_id_by_name(name).await?;
        let update = ItemUpdate {
            name: None,
            complete: Some(complete),
        };
        self.update_item(&item_id, update, context).await
    }

    /// Complete or reopen every item, returning the ones that changed
    pub async fn set_all(&self, complete: bool, context: &Context) -> ShoppingListResult<Vec<ShoppingListItem>> {
        let mut guard = self.data.lock().await;
        let data = guard.as_mut().ok_or(ShoppingListError::NotLoaded)?;

        let changed = data.set_all(complete).await;
        if !changed.is_empty() {
            self.save(&data.items).await;
        }
        for item in &changed {
            self.notify(UpdateAction::Update, Some(item.clone()), context);
        }
        Ok(changed)
    }

    pub async fn clear_completed(&self, context: &Context) -> ShoppingListResult<Vec<ShoppingListItem>> {
        let mut guard = self.data.lock().await;
        let data = guard.as_mut().ok_or(ShoppingListError::NotLoaded)?;

        let cleared = data.clear_completed().await;
        self.save(&data.items).await;
        self.notify(UpdateAction::Clear, None, context);
        Ok(cleared)
    }

    /// Pull the selected Grosh list into the local one
    pub async fn sync(&self, context: &Context) -> ShoppingListResult<Vec<ShoppingListItem>> {
        let mut guard = self.data.lock().await;
        let data = guard.as_mut().ok_or(ShoppingListError::NotLoaded)?;

        data.sync().await?;
        self.save(&data.items).await;
        self.notify(UpdateAction::Sync, None, context);
        info!("Synced {} items from Grosh", data.items.len());
        Ok(data.items.clone())
    }

    /// Switch to another Grosh list, pull it and remember the choice
    pub async fn select_list(&self, name_or_id: &str, context: &Context) -> ShoppingListResult<Household> {
        let (household, entry_id) = {
            let mut guard = self.data.lock().await;
            let data = guard.as_mut().ok_or(ShoppingListError::NotLoaded)?;

            let household = data.select_list(name_or_id).await?;
            if let Err(err) = data.sync().await {
                warn!("Selected {} but the first sync failed: {}", household.name, err);
            }
            self.save(&data.items).await;
            (household, data.entry_id.clone())
        };
        self.notify(UpdateAction::Sync, None, context);

        // The options listener locks the list again
        self.persist_list_id(&entry_id, &household.id).await;
        Ok(household)
    }

    async fn persist_list_id(&self, entry_id: &str, list_id: &str) {
        let Some(entry) = self.entries.get(entry_id) else {
            warn!(entry_id, "Config entry vanished, list selection not saved");
            return;
        };

        let mut options = entry.options.clone();
        options.insert(CONF_LIST_ID.to_string(), json!(list_id));
        if let Err(err) = self
            .entries
            .update(entry_id, ConfigEntryUpdate::new().options(options))
            .await
        {
            error!(entry_id, "Failed to save selected Grosh list: {}", err);
        }
    }

    async fn item_id_by_name(&self, name: &str) -> ShoppingListResult<String> {
        let guard = self.data.lock().await;
        let data = guard.as_ref().ok_or(ShoppingListError::NotLoaded)?;
        data.item_id_by_name(name)
    }

    // =========================================================================
    // Lifecycle helpers
    // =========================================================================

    /// Log in and load the catalog for `locale`
    pub(crate) async fn connect(
        &self,
        username: &str,
        password: &str,
        locale: &str,
    ) -> ShoppingListResult<GroshLink> {
        let api = (self.grosh_factory)(username, password);
        api.login().await?;
        let catalog = api.catalog(locale).await?;
        debug!(locale, groceries = catalog.len(), "Loaded Grosh catalog");

        Ok(GroshLink {
            api,
            locale: locale.to_string(),
            catalog,
            list_id: None,
        })
    }

    pub(crate) async fn load_items(&self) -> Vec<ShoppingListItem> {
        match self.storage.load_json::<Vec<ShoppingListItem>>(PERSISTENCE).await {
            Ok(items) => items.unwrap_or_default(),
            Err(err) => {
                warn!("Ignoring unreadable shopping list: {}", err);
                Vec::new()
            }
        }
    }

    pub(crate) async fn save(&self, items: &[ShoppingListItem]) {
        if let Err(err) = self.storage.save_json(PERSISTENCE, items).await {
            error!("Failed to save shopping list: {}", err);
        }
    }

    pub(crate) fn notify(&self, action: UpdateAction, item: Option<ShoppingListItem>, context: &Context) {
        self.bus
            .fire_typed(ShoppingListUpdated { action, item }, context.child());
    }
}
