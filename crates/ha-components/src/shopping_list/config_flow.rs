//! Config flow linking a Grosh account
//!
//! The `user` step asks for credentials and checks them against Grosh, the
//! `list` step picks one of the account's lists. YAML configuration enters
//! through the `import` step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ha_config::{ShoppingListYamlConfig, DEFAULT_LOCALE};
use ha_config_entries::{ConfigEntries, ConfigFlow, FlowStep, FormField, NewEntry};
use ha_grosh::{GroshError, Household};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::component::GroshFactory;
use super::data::find_household;
use super::{CONF_LIST, CONF_LIST_ID, CONF_LOCALE, CONF_PASSWORD, CONF_USERNAME, DOMAIN};

#[derive(Debug, Deserialize)]
struct UserInput {
    username: String,
    password: String,
    #[serde(default = "default_locale")]
    locale: String,
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

/// Checked credentials waiting for a list choice
struct Account {
    input: UserInput,
    households: Vec<Household>,
}

pub struct GroshConfigFlow {
    entries: Arc<ConfigEntries>,
    grosh_factory: GroshFactory,
    account: Option<Account>,
}

impl GroshConfigFlow {
    pub fn new(entries: Arc<ConfigEntries>, grosh_factory: GroshFactory) -> Self {
        Self {
            entries,
            grosh_factory,
            account: None,
        }
    }

    fn user_form() -> FlowStep {
        FlowStep::form(
            "user",
            vec![
                FormField::string(CONF_USERNAME),
                FormField::string(CONF_PASSWORD),
                FormField::string(CONF_LOCALE).with_default(DEFAULT_LOCALE),
            ],
        )
    }

    fn list_form(households: &[Household]) -> FlowStep {
        let names = households.iter().map(|h| h.name.clone()).collect();
        FlowStep::form("list", vec![FormField::select(CONF_LIST, names)]).last_step()
    }

    /// Log in and fetch the account's lists
    async fn check_account(&self, username: &str, password: &str) -> Result<Vec<Household>, GroshError> {
        let api = (self.grosh_factory)(username, password);
        api.login().await?;
        api.households().await
    }

    fn is_configured(&self) -> bool {
        !self.entries.get_by_domain(DOMAIN).is_empty()
    }

    async fn step_user(&mut self, user_input: Option<serde_json::Value>) -> FlowStep {
        if self.is_configured() {
            return FlowStep::abort("already_configured");
        }
        let Some(user_input) = user_input else {
            return Self::user_form();
        };
        let input: UserInput = match serde_json::from_value(user_input) {
            Ok(input) => input,
            Err(err) => {
                warn!("Rejected config flow input: {}", err);
                return Self::user_form().with_error("base", "invalid_input");
            }
        };

        match self.check_account(&input.username, &input.password).await {
            Ok(households) if households.is_empty() => FlowStep::abort("no_lists"),
            Ok(households) => {
                let form = Self::list_form(&households);
                self.account = Some(Account { input, households });
                form
            }
            Err(err) => Self::user_form().with_error("base", error_key(&err)),
        }
    }

    fn step_list(&mut self, user_input: Option<serde_json::Value>) -> FlowStep {
        let Some(account) = self.account.as_ref() else {
            return Self::user_form();
        };
        let Some(choice) = user_input
            .as_ref()
            .and_then(|input| input.get(CONF_LIST))
            .and_then(|value| value.as_str())
        else {
            return Self::list_form(&account.households);
        };

        let Some(household) = find_household(account.households.clone(), choice) else {
            return Self::list_form(&account.households).with_error(CONF_LIST, "unknown_list");
        };

        let input = &account.input;
        let mut new_entry = new_entry(&input.username, &input.password, &input.locale);
        new_entry
            .options
            .insert(CONF_LIST_ID.to_string(), json!(household.id));
        FlowStep::CreateEntry(new_entry)
    }

    async fn step_import(&mut self, user_input: Option<serde_json::Value>) -> FlowStep {
        let Some(config) = user_input
            .and_then(|value| serde_json::from_value::<ShoppingListYamlConfig>(value).ok())
        else {
            return FlowStep::abort("invalid_import");
        };

        let unique_id = config.grosh_username.to_lowercase();
        let other_account = self
            .entries
            .get_by_domain(DOMAIN)
            .into_iter()
            .any(|entry| entry.unique_id.as_deref() != Some(unique_id.as_str()));
        if other_account {
            return FlowStep::abort("already_configured");
        }

        let households = match self
            .check_account(&config.grosh_username, &config.grosh_password)
            .await
        {
            Ok(households) => households,
            Err(err) => {
                warn!("Grosh account from configuration.yaml was rejected: {}", err);
                return FlowStep::abort(error_key(&err));
            }
        };

        let mut new_entry = new_entry(&config.grosh_username, &config.grosh_password, &config.locale);
        if let Some(list) = &config.grosh_list {
            match find_household(households, list) {
                Some(household) => {
                    new_entry
                        .options
                        .insert(CONF_LIST_ID.to_string(), json!(household.id));
                }
                None => warn!("Grosh list {} from configuration.yaml not found", list),
            }
        }
        info!(username = %config.grosh_username, "Importing Grosh account");
        FlowStep::CreateEntry(new_entry)
    }
}

fn new_entry(username: &str, password: &str, locale: &str) -> NewEntry {
    let data = HashMap::from([
        (CONF_USERNAME.to_string(), json!(username)),
        (CONF_PASSWORD.to_string(), json!(password)),
        (CONF_LOCALE.to_string(), json!(locale)),
    ]);
    NewEntry {
        title: username.to_string(),
        data,
        options: HashMap::new(),
        unique_id: Some(username.to_lowercase()),
    }
}

fn error_key(err: &GroshError) -> &'static str {
    if err.is_auth() {
        "invalid_auth"
    } else {
        "cannot_connect"
    }
}

#[async_trait]
impl ConfigFlow for GroshConfigFlow {
    async fn step(&mut self, step_id: &str, user_input: Option<serde_json::Value>) -> FlowStep {
        match step_id {
            "user" => self.step_user(user_input).await,
            "list" => self.step_list(user_input),
            "import" => self.step_import(user_input).await,
            other => {
                warn!(step_id = other, "Unknown config flow step");
                FlowStep::abort("unknown_step")
            }
        }
    }
}
