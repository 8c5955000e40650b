//! Configuration discovery and resolution

use super::types::{Config, FileConfig};
use crate::home::get_home_dir;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const REPO_CONFIG_NAME: &str = ".afb.toml";
const GLOBAL_CONFIG_PATH: &str = ".config/afb/config.toml";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Explicitly requested config file does not exist
    #[error("Configuration not found: {0}")]
    NotFound(PathBuf),

    /// Environment variable holds an unusable value
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Caller-supplied overrides (highest priority)
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Override bus root
    pub root: Option<PathBuf>,
    /// Override component length bound
    pub max_component_len: Option<usize>,
    /// Override lock retries
    pub lock_retries: Option<u32>,
    /// Use this file instead of searching for `.afb.toml`
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Caller overrides
/// 2. Environment variables (`AFB_ROOT`, `AFB_MAX_COMPONENT_LEN`,
///    `AFB_LOCK_RETRIES`, `AFB_SYNC_DIRS`)
/// 3. Repo-local config (`.afb.toml` in `current_dir` or a parent, up to the git root),
///    or `overrides.config_path` when given
/// 4. Global config (`~/.config/afb/config.toml`)
/// 5. Defaults
///
/// A relative `root` from a file is anchored at that file's directory; from
/// the environment or overrides it is anchored at `current_dir`.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    config.bus.root = current_dir.join(&config.bus.root);

    // 4. Global config
    let global_config_path = home_dir.join(GLOBAL_CONFIG_PATH);
    if global_config_path.exists() {
        match load_config_file(&global_config_path) {
            Ok(file) => merge_config(&mut config, file, home_dir),
            Err(e) => warn!("Failed to parse global config at {global_config_path:?}: {e}"),
        }
    }

    // 3. Explicit file, or repo-local discovery
    if let Some(path) = &overrides.config_path {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.clone()));
        }
        let file = load_config_file(path)?;
        merge_config(&mut config, file, parent_or(path, current_dir));
    } else if let Some(repo_config) = find_repo_local_config(current_dir) {
        match load_config_file(&repo_config) {
            Ok(file) => merge_config(&mut config, file, parent_or(&repo_config, current_dir)),
            Err(e) => warn!("Failed to parse repo config at {repo_config:?}: {e}"),
        }
    }

    // 2. Environment
    apply_env_overrides(&mut config, current_dir)?;

    // 1. Caller overrides
    if let Some(root) = &overrides.root {
        config.bus.root = current_dir.join(root);
    }
    if let Some(len) = overrides.max_component_len {
        config.bus.max_component_len = len;
    }
    if let Some(retries) = overrides.lock_retries {
        config.bus.lock_retries = retries;
    }

    Ok(config)
}

/// [`resolve_config`] using the process working directory and home directory
pub fn resolve_config_from_env(overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    let current_dir = std::env::current_dir()?;
    let home_dir = get_home_dir().unwrap_or_else(|e| {
        warn!("Could not resolve home directory, skipping global config: {e}");
        current_dir.clone()
    });
    resolve_config(overrides, &current_dir, &home_dir)
}

fn parent_or<'a>(path: &'a Path, fallback: &'a Path) -> &'a Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(fallback)
}

/// Find repo-local config file
///
/// Searches current directory and parent directories up to git root
fn find_repo_local_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;

    loop {
        let config_path = dir.join(REPO_CONFIG_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        // Stop at git root
        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Layer a file's explicitly set values over `base`
fn merge_config(base: &mut Config, file: FileConfig, anchor: &Path) {
    if let Some(root) = file.bus.root {
        base.bus.root = anchor.join(root);
    }
    if let Some(len) = file.bus.max_component_len {
        base.bus.max_component_len = len;
    }
    if let Some(retries) = file.bus.lock_retries {
        base.bus.lock_retries = retries;
    }
    if let Some(sync) = file.bus.sync_directories {
        base.bus.sync_directories = sync;
    }
    if let Some(level) = file.logging.level {
        base.logging.level = level;
    }
}

fn env_value(var: &'static str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env_value(var) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}

fn apply_env_overrides(config: &mut Config, current_dir: &Path) -> Result<(), ConfigError> {
    if let Some(root) = env_value("AFB_ROOT") {
        config.bus.root = current_dir.join(root);
    }
    if let Some(len) = parse_env::<usize>("AFB_MAX_COMPONENT_LEN")? {
        config.bus.max_component_len = len;
    }
    if let Some(retries) = parse_env::<u32>("AFB_LOCK_RETRIES")? {
        config.bus.lock_retries = retries;
    }
    if let Some(value) = env_value("AFB_SYNC_DIRS") {
        config.bus.sync_directories = match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::InvalidEnv {
                    var: "AFB_SYNC_DIRS",
                    value,
                });
            }
        };
    }
    Ok(())
}
