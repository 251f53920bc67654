//! Payloads exchanged with Grosh
//!
//! Identifiers arrive as strings or numbers depending on the endpoint; both
//! are normalized to strings.

use serde::{Deserialize, Deserializer, Serialize};

/// A household, which is what Grosh calls a shared list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Household {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

/// Catalog entry; every list item refers to one of these
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grocery {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

/// One entry on a household's current list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// List-entry id, distinct from the grocery id
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    pub name: String,

    #[serde(rename = "groceryId", deserialize_with = "string_or_number")]
    pub grocery_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<serde_json::Value>,

    #[serde(default)]
    pub bought: bool,
}

/// The current list comes grouped by category
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CategoryGroup {
    #[serde(default)]
    pub groceries: Vec<RemoteItem>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}
