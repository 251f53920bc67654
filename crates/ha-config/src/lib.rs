//! YAML configuration loading
//!
//! `configuration.yaml` may use these tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! [`Configuration`] then picks out the sections this runtime understands.
//!
//! ```ignore
//! use ha_config::Configuration;
//!
//! let config = Configuration::load("/config")?;
//! if let Some(shopping_list) = config.shopping_list {
//!     println!("importing Grosh account {}", shopping_list.grosh_username);
//! }
//! ```

mod error;
mod loader;
mod secrets;
mod sections;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;
pub use sections::{Configuration, HttpConfig, ShoppingListYamlConfig, DEFAULT_LOCALE};

pub use serde_yaml::Value;
