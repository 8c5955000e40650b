//! Configuration types

use crate::text::DEFAULT_MAX_COMPONENT_LEN;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Bus storage configuration
    #[serde(default)]
    pub bus: BusConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how the bus stores messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus root; holds inbox/, outbox/, locks/, dlq/, tmp/, processed/
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Upper bound for one sanitized path component (agent ids, message ids)
    #[serde(default = "default_max_component_len")]
    pub max_component_len: usize,
    /// Backoff retries when taking the processed-log lock
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,
    /// Fsync parent directories after renames (unix)
    #[serde(default = "default_sync_directories")]
    pub sync_directories: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_component_len: default_max_component_len(),
            lock_retries: default_lock_retries(),
            sync_directories: default_sync_directories(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("messages")
}

fn default_max_component_len() -> usize {
    DEFAULT_MAX_COMPONENT_LEN
}

fn default_lock_retries() -> u32 {
    5
}

fn default_sync_directories() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `AFB_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// On-disk shape of a config file; every field optional so files layer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct FileConfig {
    #[serde(default)]
    pub bus: FileBusConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct FileBusConfig {
    pub root: Option<PathBuf>,
    pub max_component_len: Option<usize>,
    pub lock_retries: Option<u32>,
    pub sync_directories: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct FileLoggingConfig {
    pub level: Option<String>,
}
