//! Shopping list synced with Grosh
//!
//! Local mutations are pushed to the selected Grosh list as they happen
//! (the push path); the `grosh_sync` and `grosh_select_list` services pull
//! the remote list back (the pull path). The account is linked through a
//! config entry created by [`GroshConfigFlow`], either from the UI or by
//! importing the `shopping_list:` section of `configuration.yaml`.

mod component;
mod config_flow;
mod data;
mod error;
mod item;
mod services;
mod setup;

#[cfg(test)]
pub(crate) mod mock;

use ha_core::EventData;
use serde::{Deserialize, Serialize};

pub use component::{GroshFactory, ShoppingList};
pub use config_flow::GroshConfigFlow;
pub use error::{ShoppingListError, ShoppingListResult};
pub use item::{parse_name, ItemUpdate, ShoppingListItem};

pub const DOMAIN: &str = "shopping_list";

/// Items are kept in the config directory under this name
pub const PERSISTENCE: &str = ".shopping_list.json";

pub const EVENT_SHOPPING_LIST_UPDATED: &str = "shopping_list_updated";

// Config entry keys
pub const CONF_USERNAME: &str = "username";
pub const CONF_PASSWORD: &str = "password";
pub const CONF_LOCALE: &str = "locale";
pub const CONF_LIST_ID: &str = "list_id";
pub const CONF_LIST: &str = "list";

pub const ATTR_NAME: &str = "name";

pub const SERVICE_ADD_ITEM: &str = "add_item";
pub const SERVICE_REMOVE_ITEM: &str = "remove_item";
pub const SERVICE_COMPLETE_ITEM: &str = "complete_item";
pub const SERVICE_INCOMPLETE_ITEM: &str = "incomplete_item";
pub const SERVICE_COMPLETE_ALL: &str = "complete_all";
pub const SERVICE_INCOMPLETE_ALL: &str = "incomplete_all";
pub const SERVICE_CLEAR_COMPLETED_ITEMS: &str = "clear_completed_items";
pub const SERVICE_GROSH_SYNC: &str = "grosh_sync";
pub const SERVICE_GROSH_SELECT_LIST: &str = "grosh_select_list";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Add,
    Update,
    Remove,
    Clear,
    Sync,
}

/// Payload of `shopping_list_updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingListUpdated {
    pub action: UpdateAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ShoppingListItem>,
}

impl EventData for ShoppingListUpdated {
    fn event_type() -> &'static str {
        EVENT_SHOPPING_LIST_UPDATED
    }
}
