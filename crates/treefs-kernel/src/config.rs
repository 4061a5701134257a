//! Volume and store configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! database = "/var/lib/treefs/store.db"
//!
//! [volume]
//! label = "DATA"
//! root_name = "root"
//! cluster_size = 4096
//! ```
//!
//! Every field is optional. A missing `database` means an in-memory SQLite
//! store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{Backend, BackendError, SqliteBackend};
use crate::error::{FsError, FsResult};

pub const DEFAULT_LABEL: &str = "TREEFS";
pub const DEFAULT_ROOT_NAME: &str = "root";
pub const DEFAULT_CLUSTER_SIZE: u32 = 1024;

/// Parameters for a new volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub label: String,
    /// Name of the root directory.
    pub root_name: String,
    /// Bytes per cluster; must be positive.
    pub cluster_size: u32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            root_name: DEFAULT_ROOT_NAME.to_string(),
            cluster_size: DEFAULT_CLUSTER_SIZE,
        }
    }
}

impl VolumeConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = name.into();
        self
    }

    pub fn with_cluster_size(mut self, size: u32) -> Self {
        self.cluster_size = size;
        self
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.cluster_size == 0 {
            return Err(FsError::InvalidClusterSize(self.cluster_size));
        }
        crate::node::validate_name(&self.root_name)
    }
}

/// Where volumes are stored, plus defaults for new volumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. `None` keeps everything in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub volume: VolumeConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] FsError),
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.volume.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded store config");
        Ok(config)
    }

    /// Open the configured backend.
    pub fn open_backend(&self) -> Result<Box<dyn Backend>, BackendError> {
        match &self.database {
            Some(path) => Ok(Box::new(SqliteBackend::open(path)?)),
            None => Ok(Box::new(SqliteBackend::in_memory()?)),
        }
    }
}
