//! Built-in components
//!
//! Components plug into the host through config entries, services and the
//! event bus. The only one so far is the Grosh-synced shopping list.

pub mod shopping_list;

pub use shopping_list::{
    GroshConfigFlow, GroshFactory, ItemUpdate, ShoppingList, ShoppingListError, ShoppingListItem,
    ShoppingListUpdated, UpdateAction,
};
