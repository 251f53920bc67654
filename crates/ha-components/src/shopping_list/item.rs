//! Shopping list items

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingListItem {
    /// 32 hex chars, assigned locally
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub complete: bool,

    /// Grosh catalog id, when the name could be resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grocery_id: Option<String>,

    /// Grosh list-entry id, once the item is known remotely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl ShoppingListItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.into(),
            complete: false,
            grocery_id: None,
            remote_id: None,
        }
    }
}

/// Changes accepted by the update endpoints
///
/// `bought` is accepted as an alias of `complete`, the Grosh term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemUpdate {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, alias = "bought")]
    pub complete: Option<bool>,
}

/// Split `"Milk [g42]"` into the name and the explicit grocery id
///
/// Names without a trailing bracketed id are returned trimmed and unchanged.
pub fn parse_name(input: &str) -> (String, Option<String>) {
    let input = input.trim();
    if let Some(without_close) = input.strip_suffix(']') {
        if let Some(open) = without_close.rfind(" [") {
            let id = without_close[open + 2..].trim();
            let name = without_close[..open].trim();
            if !id.is_empty() && !name.is_empty() {
                return (name.to_string(), Some(id.to_string()));
            }
        }
    }
    (input.to_string(), None)
}
