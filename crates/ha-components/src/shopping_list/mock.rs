//! In-memory Grosh account for tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ha_config_entries::{ConfigEntries, ConfigEntry, FlowManager};
use ha_event_bus::EventBus;
use ha_grosh::{GroshApi, GroshError, GroshResult, Grocery, Household, RemoteItem};
use ha_service_registry::ServiceRegistry;
use ha_storage::Storage;
use serde_json::json;
use tempfile::TempDir;

use super::component::{GroshFactory, ShoppingList};
use super::{CONF_LIST_ID, CONF_LOCALE, CONF_PASSWORD, CONF_USERNAME, DOMAIN};

pub(crate) struct MockGrosh {
    state: Mutex<MockState>,
}

struct MockState {
    households: Vec<Household>,
    remote: HashMap<String, Vec<RemoteItem>>,
    calls: Vec<String>,
    locales: Vec<String>,
    next_entry: u32,
    reject_login: bool,
    unavailable: bool,
    fail_mutations: bool,
    household_failures: u32,
    fetch_delay: Option<Duration>,
}

impl Default for MockGrosh {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState {
                households: vec![
                    Household { id: "7".into(), name: "Home".into() },
                    Household { id: "8".into(), name: "Office".into() },
                ],
                remote: HashMap::new(),
                calls: Vec::new(),
                locales: Vec::new(),
                next_entry: 0,
                reject_login: false,
                unavailable: false,
                fail_mutations: false,
                household_failures: 0,
                fetch_delay: None,
            }),
        }
    }
}

impl MockGrosh {
    pub fn reject_login(&self, reject: bool) {
        self.state.lock().unwrap().reject_login = reject;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.state.lock().unwrap().fail_mutations = fail;
    }

    /// Answer the next `times` household lookups with a gateway timeout
    pub fn fail_households(&self, times: u32) {
        self.state.lock().unwrap().household_failures = times;
    }

    /// Stall list fetches, recording "current done" once they return
    pub fn delay_fetches(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn set_remote(&self, list_id: &str, items: Vec<RemoteItem>) {
        self.state.lock().unwrap().remote.insert(list_id.to_string(), items);
    }

    pub fn remote(&self, list_id: &str) -> Vec<RemoteItem> {
        self.state
            .lock()
            .unwrap()
            .remote
            .get(list_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Mutating calls in order, e.g. "add 7 g-milk"
    pub fn mutations(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| ["add ", "bought ", "remove "].iter().any(|p| c.starts_with(p)))
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Locales passed to catalog and list fetches
    pub fn locales(&self) -> Vec<String> {
        self.state.lock().unwrap().locales.clone()
    }

    fn record(&self, call: String) -> GroshResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.unavailable {
            return Err(GroshError::Api {
                status: 503,
                message: "Service Unavailable".into(),
            });
        }
        Ok(())
    }

    fn record_mutation(&self, call: String) -> GroshResult<()> {
        self.record(call)?;
        if self.state.lock().unwrap().fail_mutations {
            return Err(GroshError::Api {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }
        Ok(())
    }
}

fn catalog() -> Vec<Grocery> {
    vec![
        Grocery { id: "g-milk".into(), name: "Milk".into() },
        Grocery { id: "g-eggs".into(), name: "Eggs".into() },
        Grocery { id: "g-bread".into(), name: "Bread".into() },
    ]
}

#[async_trait]
impl GroshApi for MockGrosh {
    async fn login(&self) -> GroshResult<()> {
        self.record("login".into())?;
        if self.state.lock().unwrap().reject_login {
            return Err(GroshError::AuthenticationFailed("Invalid credentials".into()));
        }
        Ok(())
    }

    async fn households(&self) -> GroshResult<Vec<Household>> {
        self.record("households".into())?;
        let mut state = self.state.lock().unwrap();
        if state.household_failures > 0 {
            state.household_failures -= 1;
            return Err(GroshError::Api {
                status: 504,
                message: "Gateway Timeout".into(),
            });
        }
        Ok(state.households.clone())
    }

    async fn catalog(&self, locale: &str) -> GroshResult<Vec<Grocery>> {
        self.record(format!("catalog {locale}"))?;
        self.state.lock().unwrap().locales.push(locale.to_string());
        Ok(catalog())
    }

    async fn current_items(&self, household_id: &str, locale: &str) -> GroshResult<Vec<RemoteItem>> {
        self.record(format!("current {household_id} {locale}"))?;
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.locales.push(locale.to_string());
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            self.state.lock().unwrap().calls.push("current done".into());
        }
        Ok(self.remote(household_id))
    }

    async fn add_item(&self, household_id: &str, grocery_id: &str) -> GroshResult<Option<String>> {
        self.record_mutation(format!("add {household_id} {grocery_id}"))?;

        let mut state = self.state.lock().unwrap();
        state.next_entry += 1;
        let entry_id = format!("entry-{}", state.next_entry);
        let name = catalog()
            .into_iter()
            .find(|g| g.id == grocery_id)
            .map(|g| g.name)
            .unwrap_or_else(|| grocery_id.to_string());
        state
            .remote
            .entry(household_id.to_string())
            .or_default()
            .push(RemoteItem {
                id: entry_id.clone(),
                name,
                grocery_id: grocery_id.to_string(),
                amount: None,
                bought: false,
            });
        Ok(Some(entry_id))
    }

    async fn mark_bought(&self, household_id: &str, entry_id: &str) -> GroshResult<()> {
        self.record_mutation(format!("bought {household_id} {entry_id}"))?;

        let mut state = self.state.lock().unwrap();
        if let Some(items) = state.remote.get_mut(household_id) {
            for item in items.iter_mut().filter(|i| i.id == entry_id) {
                item.bought = true;
            }
        }
        Ok(())
    }

    async fn remove_item(&self, household_id: &str, entry_id: &str) -> GroshResult<()> {
        self.record_mutation(format!("remove {household_id} {entry_id}"))?;

        let mut state = self.state.lock().unwrap();
        if let Some(items) = state.remote.get_mut(household_id) {
            items.retain(|i| i.id != entry_id);
        }
        Ok(())
    }
}

// =============================================================================
// Component harness
// =============================================================================

pub(crate) struct Harness {
    pub flows: FlowManager,
    pub entries: Arc<ConfigEntries>,
    pub list: Arc<ShoppingList>,
    pub mock: Arc<MockGrosh>,
    pub _dir: TempDir,
}

/// A registered but not yet set up component, backed by one shared mock
pub(crate) async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(Storage::new(dir.path()));
    let entries = Arc::new(ConfigEntries::new(storage.clone()));
    let mock = Arc::new(MockGrosh::default());

    let shared = mock.clone();
    let factory: GroshFactory =
        Arc::new(move |_: &str, _: &str| -> Arc<dyn GroshApi> { shared.clone() });
    let list = ShoppingList::new(
        Arc::new(EventBus::new()),
        Arc::new(ServiceRegistry::new()),
        storage,
        entries.clone(),
        factory,
    );
    let flows = FlowManager::new(entries.clone());
    list.register(&flows);

    Harness {
        flows,
        entries,
        list,
        mock,
        _dir: dir,
    }
}

pub(crate) fn test_entry(list_id: Option<&str>) -> ConfigEntry {
    let data = HashMap::from([
        (CONF_USERNAME.to_string(), json!("anna")),
        (CONF_PASSWORD.to_string(), json!("secret")),
        (CONF_LOCALE.to_string(), json!("de-DE")),
    ]);
    let options = list_id
        .map(|id| HashMap::from([(CONF_LIST_ID.to_string(), json!(id))]))
        .unwrap_or_default();
    ConfigEntry::new(DOMAIN, "anna")
        .with_data(data)
        .with_options(options)
        .with_unique_id("anna")
}

/// A component with a loaded entry
pub(crate) async fn setup_loaded(list_id: Option<&str>) -> (TempDir, Arc<MockGrosh>, Arc<ShoppingList>) {
    let harness = harness().await;
    let entry = harness.entries.add(test_entry(list_id)).await.unwrap();
    harness.entries.setup(&entry.entry_id).await.unwrap();
    (harness._dir, harness.mock, harness.list)
}
