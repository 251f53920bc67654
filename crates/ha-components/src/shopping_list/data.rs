//! Local list state and its Grosh mirror
//!
//! Every local mutation pushes exactly one mutation to the selected Grosh
//! list. Push failures are logged and the local change stays; nothing is
//! retried. A sync pulls the remote list and merges it into the local one.

use std::sync::Arc;

use ha_grosh::{GroshApi, Grocery, Household, RemoteItem};
use tracing::{debug, info, warn};

use super::error::{ShoppingListError, ShoppingListResult};
use super::item::{parse_name, ItemUpdate, ShoppingListItem};

// =============================================================================
// Grosh link
// =============================================================================

/// Everything needed to talk to one Grosh account
pub(crate) struct GroshLink {
    pub api: Arc<dyn GroshApi>,
    pub locale: String,
    pub catalog: Vec<Grocery>,
    pub list_id: Option<String>,
}

impl GroshLink {
    /// Case-insensitive catalog lookup
    pub fn resolve_grocery(&self, name: &str) -> Option<String> {
        let wanted = name.to_lowercase();
        self.catalog
            .iter()
            .find(|grocery| grocery.name.to_lowercase() == wanted)
            .map(|grocery| grocery.id.clone())
    }

    /// Selected list, or a warning that the push is skipped
    fn target_list(&self, item: &ShoppingListItem) -> Option<&str> {
        if self.list_id.is_none() {
            warn!("No Grosh list selected, {} stays local", item.name);
        }
        self.list_id.as_deref()
    }

    /// List-entry id of an item, asking Grosh when it is not known yet
    async fn resolve_entry(&self, list_id: &str, item: &ShoppingListItem) -> Option<String> {
        if let Some(remote_id) = &item.remote_id {
            return Some(remote_id.clone());
        }

        match self.api.current_items(list_id, &self.locale).await {
            Ok(remote) => {
                let found = remote
                    .into_iter()
                    .find(|entry| same_item(item, entry))
                    .map(|entry| entry.id);
                if found.is_none() {
                    warn!("{} is not on the Grosh list", item.name);
                }
                found
            }
            Err(err) => {
                warn!("Failed to look up {} on Grosh: {}", item.name, err);
                None
            }
        }
    }

    async fn push_add(&self, item: &mut ShoppingListItem) {
        let Some(list_id) = self.target_list(item) else {
            return;
        };
        let Some(grocery_id) = item.grocery_id.as_deref() else {
            warn!("{} is not in the Grosh catalog, kept locally", item.name);
            return;
        };

        match self.api.add_item(list_id, grocery_id).await {
            Ok(entry_id) => {
                debug!("Added {} to Grosh list {}", item.name, list_id);
                if entry_id.is_some() {
                    item.remote_id = entry_id;
                }
            }
            Err(err) => warn!("Failed to add {} to Grosh: {}", item.name, err),
        }
    }

    async fn push_bought(&self, item: &ShoppingListItem) {
        let Some(list_id) = self.target_list(item) else {
            return;
        };
        let Some(entry_id) = self.resolve_entry(list_id, item).await else {
            return;
        };

        match self.api.mark_bought(list_id, &entry_id).await {
            Ok(()) => debug!("Marked {} bought on Grosh", item.name),
            Err(err) => warn!("Failed to mark {} bought on Grosh: {}", item.name, err),
        }
    }

    async fn push_remove(&self, item: &mut ShoppingListItem) {
        let Some(list_id) = self.target_list(item) else {
            return;
        };
        let Some(entry_id) = self.resolve_entry(list_id, item).await else {
            return;
        };

        match self.api.remove_item(list_id, &entry_id).await {
            Ok(()) => {
                debug!("Removed {} from Grosh", item.name);
                item.remote_id = None;
            }
            Err(err) => warn!("Failed to remove {} from Grosh: {}", item.name, err),
        }
    }
}

fn same_item(local: &ShoppingListItem, remote: &RemoteItem) -> bool {
    match &local.grocery_id {
        Some(grocery_id) => *grocery_id == remote.grocery_id,
        None => local.name.to_lowercase() == remote.name.to_lowercase(),
    }
}

// =============================================================================
// Shopping data
// =============================================================================

pub(crate) struct ShoppingData {
    /// Config entry this state belongs to
    pub entry_id: String,
    pub items: Vec<ShoppingListItem>,
    pub grosh: GroshLink,
}

impl ShoppingData {
    fn position(&self, item_id: &str) -> ShoppingListResult<usize> {
        self.items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| ShoppingListError::ItemNotFound(item_id.to_string()))
    }

    /// Find an item by display name, exact match first
    pub fn find_by_name(&self, name: &str) -> ShoppingListResult<usize> {
        let (name, _) = parse_name(name);
        let lowered = name.to_lowercase();
        self.items
            .iter()
            .position(|item| item.name == name)
            .or_else(|| {
                self.items
                    .iter()
                    .position(|item| item.name.to_lowercase() == lowered)
            })
            .ok_or(ShoppingListError::ItemNotFound(name))
    }

    pub fn item_id_by_name(&self, name: &str) -> ShoppingListResult<String> {
        let idx = self.find_by_name(name)?;
        Ok(self.items[idx].id.clone())
    }

    pub async fn add(&mut self, name: &str) -> ShoppingListResult<ShoppingListItem> {
        let (name, explicit) = parse_name(name);
        if name.is_empty() {
            return Err(ShoppingListError::InvalidItem("name must not be empty".into()));
        }

        let mut item = ShoppingListItem::new(name);
        item.grocery_id = explicit.or_else(|| self.grosh.resolve_grocery(&item.name));
        self.grosh.push_add(&mut item).await;

        self.items.push(item.clone());
        Ok(item)
    }

    pub async fn update(
        &mut self,
        item_id: &str,
        update: ItemUpdate,
    ) -> ShoppingListResult<ShoppingListItem> {
        let idx = self.position(item_id)?;

        if let Some(new_name) = update.name {
            let (name, explicit) = parse_name(&new_name);
            if name.is_empty() {
                return Err(ShoppingListError::InvalidItem("name must not be empty".into()));
            }
            let grocery_id = explicit.or_else(|| self.grosh.resolve_grocery(&name));
            let item = &mut self.items[idx];
            if name != item.name || grocery_id != item.grocery_id {
                self.grosh.push_remove(item).await;
                item.name = name;
                item.grocery_id = grocery_id;
                item.remote_id = None;
                self.grosh.push_add(item).await;
            }
        }

        if let Some(complete) = update.complete {
            self.set_complete(idx, complete).await;
        }

        Ok(self.items[idx].clone())
    }

    /// Returns whether the state changed
    pub async fn set_complete(&mut self, idx: usize, complete: bool) -> bool {
        let item = &mut self.items[idx];
        if item.complete == complete {
            return false;
        }
        item.complete = complete;

        if complete {
            self.grosh.push_bought(item).await;
        } else {
            // Grosh has no "unbuy"; the grocery goes back on the list instead
            item.remote_id = None;
            self.grosh.push_add(item).await;
        }
        true
    }

    pub async fn set_all(&mut self, complete: bool) -> Vec<ShoppingListItem> {
        let mut changed = Vec::new();
        for idx in 0..self.items.len() {
            if self.set_complete(idx, complete).await {
                changed.push(self.items[idx].clone());
            }
        }
        changed
    }

    pub async fn remove(&mut self, item_id: &str) -> ShoppingListResult<ShoppingListItem> {
        let idx = self.position(item_id)?;
        let mut item = self.items.remove(idx);
        self.grosh.push_remove(&mut item).await;
        Ok(item)
    }

    /// Drop completed items, returning what was removed
    pub async fn clear_completed(&mut self) -> Vec<ShoppingListItem> {
        let (mut cleared, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.items).into_iter().partition(|item| item.complete);
        self.items = kept;

        for item in &mut cleared {
            self.grosh.push_remove(item).await;
        }
        cleared
    }

    /// Make the household matching `name_or_id` the active list
    pub async fn select_list(&mut self, name_or_id: &str) -> ShoppingListResult<Household> {
        let households = self.grosh.api.households().await?;
        let household = find_household(households, name_or_id)
            .ok_or_else(|| ShoppingListError::UnknownList(name_or_id.to_string()))?;

        info!("Selected Grosh list {} ({})", household.name, household.id);
        if self.grosh.list_id.as_deref() != Some(household.id.as_str()) {
            // Entry ids belong to the previous list
            for item in &mut self.items {
                item.remote_id = None;
            }
        }
        self.grosh.list_id = Some(household.id.clone());
        Ok(household)
    }

    /// Pull the selected list and merge it into the local items
    pub async fn sync(&mut self) -> ShoppingListResult<()> {
        let list_id = self
            .grosh
            .list_id
            .clone()
            .ok_or(ShoppingListError::NoListSelected)?;

        let remote = self.grosh.api.current_items(&list_id, &self.grosh.locale).await?;
        debug!("Fetched {} items from Grosh list {}", remote.len(), list_id);
        merge_remote(&mut self.items, remote);
        Ok(())
    }
}

/// Match by id first, then by name ignoring case
pub(crate) fn find_household(households: Vec<Household>, name_or_id: &str) -> Option<Household> {
    let wanted = name_or_id.trim();
    let lowered = wanted.to_lowercase();

    if let Some(pos) = households
        .iter()
        .position(|h| h.id == wanted || h.name == wanted)
    {
        return households.into_iter().nth(pos);
    }
    households
        .into_iter()
        .find(|h| h.name.to_lowercase() == lowered)
}

/// Upsert the remote entries into `items`
///
/// Remote entries are matched by entry id, then grocery id, then name.
/// Matched items take the remote name and state; unmatched remote entries
/// are appended. Local items carrying an entry id that Grosh no longer
/// reports are dropped, items never pushed are kept.
pub(crate) fn merge_remote(items: &mut Vec<ShoppingListItem>, remote: Vec<RemoteItem>) {
    let mut seen = vec![false; items.len()];

    for entry in remote {
        let by_entry = items
            .iter()
            .position(|item| item.remote_id.as_deref() == Some(entry.id.as_str()));
        let idx = by_entry.or_else(|| {
            items.iter().enumerate().position(|(idx, item)| {
                !seen[idx] && item.remote_id.is_none() && same_item(item, &entry)
            })
        });

        match idx {
            Some(idx) => {
                let item = &mut items[idx];
                item.name = entry.name;
                item.complete = entry.bought;
                item.grocery_id = Some(entry.grocery_id);
                item.remote_id = Some(entry.id);
                seen[idx] = true;
            }
            None => {
                let mut item = ShoppingListItem::new(entry.name);
                item.complete = entry.bought;
                item.grocery_id = Some(entry.grocery_id);
                item.remote_id = Some(entry.id);
                items.push(item);
                seen.push(true);
            }
        }
    }

    let mut idx = 0;
    items.retain(|item| {
        let keep = seen[idx] || item.remote_id.is_none();
        idx += 1;
        keep
    });
}
