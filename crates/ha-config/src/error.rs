//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

/// Result of loading `configuration.yaml` and its includes
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why `configuration.yaml` could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file is not valid YAML
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `!secret` names a key missing from `secrets.yaml`
    #[error("secret '{key}' not found in secrets.yaml")]
    SecretNotFound { key: String },

    /// A YAML tag was given something other than a string
    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// An included file includes itself, directly or indirectly
    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    /// `!env_var` names an unset variable
    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    /// A section is present but does not have the expected shape
    #[error("invalid configuration for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}
