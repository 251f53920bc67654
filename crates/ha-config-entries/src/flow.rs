//! Config flows
//!
//! A config flow is a short multi-step dialog that ends in a new config
//! entry. Each integration supplies a [`ConfigFlow`] implementation; the
//! [`FlowManager`] keeps the in-progress flows, feeds them user input and
//! turns their final step into an entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource, ConfigEntryUpdate};
use crate::manager::{ConfigEntries, ConfigEntriesError};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no config flow registered for {0}")]
    UnknownHandler(String),

    #[error("flow not found: {0}")]
    UnknownFlow(String),

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

/// What the API returns for each flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    /// Integration domain
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Always present, empty unless the result is a form
    pub data_schema: Vec<FormField>,
    /// Errors from the previous submission, keyed by field or `base`
    pub errors: Option<HashMap<String, String>>,
    pub description_placeholders: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Abort reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// The created entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub last_step: Option<bool>,
}

impl FlowResult {
    fn new(flow_id: &str, handler: &str, result_type: FlowResultType) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            handler: handler.to_string(),
            result_type,
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            description_placeholders: None,
            title: None,
            reason: None,
            version: None,
            result: None,
            last_step: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Choices of a `select` field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl FormField {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: "string".to_string(),
            required: Some(true),
            default: None,
            options: None,
        }
    }

    pub fn select(name: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            field_type: "select".to_string(),
            options: Some(options),
            ..Self::string(name)
        }
    }

    pub fn with_default(mut self, default: impl Into<serde_json::Value>) -> Self {
        self.default = Some(default.into());
        self.required = Some(false);
        self
    }
}

/// Entry to create when a flow finishes
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub title: String,
    pub data: HashMap<String, serde_json::Value>,
    pub options: HashMap<String, serde_json::Value>,
    pub unique_id: Option<String>,
}

/// Outcome of one step of a [`ConfigFlow`]
#[derive(Debug, Clone)]
pub enum FlowStep {
    Form {
        step_id: String,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
        last_step: Option<bool>,
    },
    CreateEntry(NewEntry),
    Abort {
        reason: String,
    },
}

impl FlowStep {
    pub fn form(step_id: impl Into<String>, data_schema: Vec<FormField>) -> Self {
        FlowStep::Form {
            step_id: step_id.into(),
            data_schema,
            errors: HashMap::new(),
            last_step: None,
        }
    }

    /// Attach an error to a form; other steps are returned unchanged
    pub fn with_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        if let FlowStep::Form { ref mut errors, .. } = self {
            errors.insert(field.into(), error.into());
        }
        self
    }

    pub fn last_step(mut self) -> Self {
        if let FlowStep::Form {
            ref mut last_step, ..
        } = self
        {
            *last_step = Some(true);
        }
        self
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        FlowStep::Abort {
            reason: reason.into(),
        }
    }
}

/// One running dialog of an integration
#[async_trait]
pub trait ConfigFlow: Send + Sync {
    /// Run `step_id`; `user_input` is None when the step is first shown
    async fn step(&mut self, step_id: &str, user_input: Option<serde_json::Value>) -> FlowStep;
}

/// Creates a fresh flow for an integration
pub type FlowFactory = Arc<dyn Fn() -> Box<dyn ConfigFlow> + Send + Sync>;

/// Interface the API layer drives flows through
#[async_trait]
pub trait ConfigFlowHandler: Send + Sync {
    /// Start a flow for `handler`; import flows receive `data` as the input
    /// of their first step
    async fn start_flow(
        &self,
        handler: &str,
        source: ConfigEntrySource,
        data: Option<serde_json::Value>,
    ) -> Result<FlowResult, FlowError>;

    async fn progress_flow(
        &self,
        flow_id: &str,
        user_input: Option<serde_json::Value>,
    ) -> Result<FlowResult, FlowError>;

    async fn abort_flow(&self, flow_id: &str) -> Result<(), FlowError>;

    async fn list_flows(&self) -> Vec<serde_json::Value>;
}

struct ActiveFlow {
    handler: String,
    source: ConfigEntrySource,
    step_id: String,
    flow: Box<dyn ConfigFlow>,
}

pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    factories: DashMap<String, FlowFactory>,
    flows: DashMap<String, Arc<Mutex<ActiveFlow>>>,
}

impl FlowManager {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self {
            entries,
            factories: DashMap::new(),
            flows: DashMap::new(),
        }
    }

    pub fn register_flow(&self, handler: &str, factory: FlowFactory) {
        self.factories.insert(handler.to_string(), factory);
        debug!(handler, "Registered config flow");
    }

    pub fn has_flow(&self, handler: &str) -> bool {
        self.factories.contains_key(handler)
    }

    async fn run_step(
        &self,
        flow_id: &str,
        active: &mut ActiveFlow,
        step_id: String,
        user_input: Option<serde_json::Value>,
    ) -> Result<FlowResult, FlowError> {
        debug!(flow_id, handler = %active.handler, step_id = %step_id, "Running flow step");
        let step = active.flow.step(&step_id, user_input).await;

        match step {
            FlowStep::Form {
                step_id,
                data_schema,
                errors,
                last_step,
            } => {
                active.step_id = step_id.clone();
                let mut result = FlowResult::new(flow_id, &active.handler, FlowResultType::Form);
                result.step_id = Some(step_id);
                result.data_schema = data_schema;
                result.errors = (!errors.is_empty()).then_some(errors);
                result.last_step = last_step;
                Ok(result)
            }
            FlowStep::Abort { reason } => {
                self.flows.remove(flow_id);
                info!(flow_id, handler = %active.handler, %reason, "Config flow aborted");
                Ok(self.abort_result(flow_id, &active.handler, reason))
            }
            FlowStep::CreateEntry(new_entry) => {
                self.flows.remove(flow_id);
                self.create_entry(flow_id, active, new_entry).await
            }
        }
    }

    async fn create_entry(
        &self,
        flow_id: &str,
        active: &ActiveFlow,
        new_entry: NewEntry,
    ) -> Result<FlowResult, FlowError> {
        let mut entry = ConfigEntry::new(&active.handler, &new_entry.title)
            .with_data(new_entry.data.clone())
            .with_options(new_entry.options)
            .with_source(active.source);
        entry.unique_id = new_entry.unique_id;

        let entry = match self.entries.add(entry).await {
            Ok(entry) => entry,
            Err(ConfigEntriesError::AlreadyExists { unique_id, .. }) => {
                // Re-importing YAML refreshes the credentials of the existing entry
                if active.source == ConfigEntrySource::Import {
                    if let Some(existing) = self.entries.get_by_unique_id(&active.handler, &unique_id) {
                        self.entries
                            .update(&existing.entry_id, ConfigEntryUpdate::new().data(new_entry.data))
                            .await?;
                    }
                }
                return Ok(self.abort_result(flow_id, &active.handler, "already_configured".into()));
            }
            Err(e) => return Err(e.into()),
        };

        // Setup failures are recorded on the entry itself
        if let Err(e) = self.entries.setup(&entry.entry_id).await {
            warn!(entry_id = %entry.entry_id, error = %e, "New entry failed to set up");
        }
        let entry = self.entries.get(&entry.entry_id).unwrap_or(entry);

        let mut result = FlowResult::new(flow_id, &active.handler, FlowResultType::CreateEntry);
        result.title = Some(entry.title.clone());
        result.version = Some(entry.version);
        result.result = Some(entry.to_api_json());
        Ok(result)
    }

    fn abort_result(&self, flow_id: &str, handler: &str, reason: String) -> FlowResult {
        let mut result = FlowResult::new(flow_id, handler, FlowResultType::Abort);
        result.reason = Some(reason);
        result
    }

    fn get_flow(&self, flow_id: &str) -> Result<Arc<Mutex<ActiveFlow>>, FlowError> {
        self.flows
            .get(flow_id)
            .map(|f| f.clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }
}

#[async_trait]
impl ConfigFlowHandler for FlowManager {
    async fn start_flow(
        &self,
        handler: &str,
        source: ConfigEntrySource,
        data: Option<serde_json::Value>,
    ) -> Result<FlowResult, FlowError> {
        let factory = self
            .factories
            .get(handler)
            .map(|f| f.clone())
            .ok_or_else(|| FlowError::UnknownHandler(handler.to_string()))?;

        let flow_id = ulid::Ulid::new().to_string();
        let active = Arc::new(Mutex::new(ActiveFlow {
            handler: handler.to_string(),
            source,
            step_id: source.initial_step().to_string(),
            flow: factory(),
        }));
        self.flows.insert(flow_id.clone(), active.clone());
        info!(flow_id = %flow_id, handler, ?source, "Started config flow");

        let mut active = active.lock().await;
        let step_id = active.step_id.clone();
        self.run_step(&flow_id, &mut active, step_id, data).await
    }

    async fn progress_flow(
        &self,
        flow_id: &str,
        user_input: Option<serde_json::Value>,
    ) -> Result<FlowResult, FlowError> {
        let flow = self.get_flow(flow_id)?;
        let mut active = flow.lock().await;
        let step_id = active.step_id.clone();
        self.run_step(flow_id, &mut active, step_id, user_input).await
    }

    async fn abort_flow(&self, flow_id: &str) -> Result<(), FlowError> {
        self.flows
            .remove(flow_id)
            .map(|_| ())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    async fn list_flows(&self) -> Vec<serde_json::Value> {
        let flows: Vec<(String, Arc<Mutex<ActiveFlow>>)> = self
            .flows
            .iter()
            .map(|f| (f.key().clone(), f.value().clone()))
            .collect();

        let mut listed = Vec::with_capacity(flows.len());
        for (flow_id, flow) in flows {
            // Flows busy running a step are skipped
            let (handler, step_id, source) = match flow.try_lock() {
                Ok(active) => (
                    active.handler.clone(),
                    Some(active.step_id.clone()),
                    active.source,
                ),
                Err(_) => continue,
            };
            listed.push(serde_json::json!({
                "flow_id": flow_id,
                "handler": handler,
                "step_id": step_id,
                "context": {"source": source},
            }));
        }
        listed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_storage::Storage;
    use serde_json::json;
    use tempfile::TempDir;

    /// Two steps: ask for a name, then confirm
    struct NamingFlow;

    #[async_trait]
    impl ConfigFlow for NamingFlow {
        async fn step(&mut self, step_id: &str, user_input: Option<serde_json::Value>) -> FlowStep {
            match (step_id, user_input) {
                ("user", None) => FlowStep::form("user", vec![FormField::string("name")]),
                ("user", Some(input)) | ("import", Some(input)) => {
                    match input.get("name").and_then(|v| v.as_str()) {
                        Some("") | None => FlowStep::form("user", vec![FormField::string("name")])
                            .with_error("name", "required"),
                        Some(name) => FlowStep::CreateEntry(NewEntry {
                            title: name.to_string(),
                            data: HashMap::from([("name".to_string(), json!(name))]),
                            unique_id: Some(name.to_lowercase()),
                            ..Default::default()
                        }),
                    }
                }
                _ => FlowStep::abort("unknown_step"),
            }
        }
    }

    fn manager() -> (TempDir, Arc<ConfigEntries>, FlowManager) {
        let dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let flows = FlowManager::new(entries.clone());
        flows.register_flow("demo", Arc::new(|| Box::new(NamingFlow) as Box<dyn ConfigFlow>));
        (dir, entries, flows)
    }

    #[tokio::test]
    async fn test_form_then_create_entry() {
        let (_dir, entries, flows) = manager();

        let form = flows
            .start_flow("demo", ConfigEntrySource::User, None)
            .await
            .unwrap();
        assert_eq!(form.result_type, FlowResultType::Form);
        assert_eq!(form.step_id.as_deref(), Some("user"));
        assert_eq!(flows.list_flows().await.len(), 1);

        let retry = flows
            .progress_flow(&form.flow_id, Some(json!({"name": ""})))
            .await
            .unwrap();
        assert_eq!(retry.errors.unwrap()["name"], "required");

        let done = flows
            .progress_flow(&form.flow_id, Some(json!({"name": "Kitchen"})))
            .await
            .unwrap();
        assert_eq!(done.result_type, FlowResultType::CreateEntry);
        assert_eq!(done.title.as_deref(), Some("Kitchen"));
        assert_eq!(done.result.unwrap()["state"], "loaded");

        assert!(flows.list_flows().await.is_empty());
        assert!(entries.get_by_unique_id("demo", "kitchen").is_some());
    }

    #[tokio::test]
    async fn test_import_refreshes_existing_entry() {
        let (_dir, entries, flows) = manager();

        let first = flows
            .start_flow("demo", ConfigEntrySource::Import, Some(json!({"name": "Kitchen"})))
            .await
            .unwrap();
        assert_eq!(first.result_type, FlowResultType::CreateEntry);

        let second = flows
            .start_flow("demo", ConfigEntrySource::Import, Some(json!({"name": "KITCHEN"})))
            .await
            .unwrap();
        assert_eq!(second.result_type, FlowResultType::Abort);
        assert_eq!(second.reason.as_deref(), Some("already_configured"));

        let entry = entries.get_by_unique_id("demo", "kitchen").unwrap();
        assert_eq!(entry.data_str("name"), Some("KITCHEN"));
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_handler_and_flow() {
        let (_dir, _entries, flows) = manager();

        assert!(matches!(
            flows.start_flow("nope", ConfigEntrySource::User, None).await,
            Err(FlowError::UnknownHandler(_))
        ));
        assert!(matches!(
            flows.progress_flow("missing", None).await,
            Err(FlowError::UnknownFlow(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_flow() {
        let (_dir, _entries, flows) = manager();

        let form = flows
            .start_flow("demo", ConfigEntrySource::User, None)
            .await
            .unwrap();
        flows.abort_flow(&form.flow_id).await.unwrap();
        assert!(flows.list_flows().await.is_empty());
        assert!(flows.abort_flow(&form.flow_id).await.is_err());
    }

    #[test]
    fn test_form_field_serialization() {
        let field = FormField::select("list", vec!["Home".into(), "Office".into()]);
        let value = serde_json::to_value(&field).unwrap();
        assert_eq!(value["type"], "select");
        assert_eq!(value["options"][1], "Office");
        assert!(value.get("default").is_none());

        let field = FormField::string("locale").with_default("en-US");
        assert_eq!(field.required, Some(false));
    }
}
