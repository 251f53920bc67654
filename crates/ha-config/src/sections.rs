//! Typed views of the `configuration.yaml` sections this runtime reads

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Locale used for catalog and list fetches when none is configured
pub const DEFAULT_LOCALE: &str = "en-US";

/// The `http:` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub server_host: String,

    #[serde(default = "default_port")]
    pub server_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_host: default_host(),
            server_port: default_port(),
        }
    }
}

impl HttpConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8123
}

/// The `shopping_list:` section
///
/// Its presence imports a Grosh account into a config entry on start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShoppingListYamlConfig {
    pub grosh_username: String,

    pub grosh_password: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    /// Name or id of the Grosh list to select after import
    #[serde(default)]
    pub grosh_list: Option<String>,
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

/// Sections of `configuration.yaml` relevant to this runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    pub http: HttpConfig,
    pub shopping_list: Option<ShoppingListYamlConfig>,
}

impl Configuration {
    /// Load `configuration.yaml` from the config directory
    ///
    /// A missing file yields the defaults.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.join("configuration.yaml").exists() {
            debug!(?config_dir, "No configuration.yaml, using defaults");
            return Ok(Self::default());
        }
        Self::from_yaml(&load_yaml(config_dir, "configuration.yaml")?)
    }

    /// Extract known sections, ignoring the rest
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        let root = match yaml {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(map) => map,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "root".to_string(),
                    reason: "configuration must be a mapping".to_string(),
                })
            }
        };

        let http = match root.get("http") {
            None | Some(Value::Null) => HttpConfig::default(),
            Some(section) => parse_section("http", section)?,
        };

        let shopping_list = match root.get("shopping_list") {
            None | Some(Value::Null) => None,
            Some(section) => Some(parse_section("shopping_list", section)?),
        };

        Ok(Self {
            http,
            shopping_list,
        })
    }
}

fn parse_section<T: serde::de::DeserializeOwned>(key: &str, value: &Value) -> ConfigResult<T> {
    serde_yaml::from_value(value.clone()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
