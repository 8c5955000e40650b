//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Caller overrides (passed as parameters)
//! 2. Environment variables
//! 3. Repo-local config (.afb.toml)
//! 4. Global config (~/.config/afb/config.toml)
//! 5. Defaults

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, resolve_config, resolve_config_from_env};
pub use types::{BusConfig, Config, LoggingConfig};
