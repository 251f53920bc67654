//! JSON persistence
//!
//! Two layouts live under the config directory:
//!
//! - `.storage/<key>`: versioned envelopes `{version, minor_version, key, data}`
//!   for host data such as config entries
//! - plain JSON files such as `.shopping_list.json`, written by components
//!
//! Every write goes to a `.tmp` sibling first and is renamed into place, so a
//! crash mid-write never leaves a truncated file behind.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    /// A file operation failed
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored file is not valid JSON for the expected type
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Written by a newer major version
    #[error("Storage {key} has version {found}, newer than supported {supported}")]
    UnsupportedVersion {
        key: String,
        found: u32,
        supported: u32,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Versioned envelope written under `.storage/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

/// Data kept in `.storage/` under a fixed key
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;
}

/// Handle on a config directory
#[derive(Debug, Clone)]
pub struct Storage {
    config_dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.config_dir.join(".storage")
    }

    /// Load the versioned document for `T`, or None if it was never saved
    ///
    /// Documents written by an older major version are still read; a newer
    /// major version is refused so its data is not clobbered on the next save.
    pub async fn load<T: Storable>(&self) -> StorageResult<Option<T>> {
        let path = self.storage_dir().join(T::KEY);
        let Some(content) = read_optional(&path).await? else {
            debug!(key = T::KEY, "No stored data");
            return Ok(None);
        };

        let file: StorageFile<T> = parse(&path, &content)?;
        if file.version > T::VERSION {
            return Err(StorageError::UnsupportedVersion {
                key: T::KEY.to_string(),
                found: file.version,
                supported: T::VERSION,
            });
        }
        if file.version < T::VERSION || file.minor_version < T::MINOR_VERSION {
            warn!(
                key = T::KEY,
                version = file.version,
                minor_version = file.minor_version,
                "Loaded older storage version, it will be rewritten on next save"
            );
        }

        debug!(key = T::KEY, "Loaded storage");
        Ok(Some(file.data))
    }

    /// Save `data` under its key with the current version
    pub async fn save<T: Storable>(&self, data: &T) -> StorageResult<()> {
        let file = StorageFile {
            version: T::VERSION,
            minor_version: T::MINOR_VERSION,
            key: T::KEY.to_string(),
            data,
        };
        write_json(&self.storage_dir().join(T::KEY), &file).await?;
        debug!(key = T::KEY, "Saved storage");
        Ok(())
    }

    /// Load a plain JSON file relative to the config directory
    pub async fn load_json<T: DeserializeOwned>(&self, name: &str) -> StorageResult<Option<T>> {
        let path = self.config_dir.join(name);
        match read_optional(&path).await? {
            Some(content) => parse(&path, &content).map(Some),
            None => Ok(None),
        }
    }

    /// Save a plain JSON file relative to the config directory
    pub async fn save_json<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> StorageResult<()> {
        write_json(&self.config_dir.join(name), data).await
    }
}

async fn read_optional(path: &Path) -> StorageResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse<T: DeserializeOwned>(path: &Path, content: &str) -> StorageResult<T> {
    serde_json::from_str(content).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> StorageResult<()> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    let content = serde_json::to_string_pretty(data).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    fs::write(&temp, content).await.map_err(io_err)?;
    fs::rename(&temp, path).await.map_err(io_err)?;
    Ok(())
}
