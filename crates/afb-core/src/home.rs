//! Home directory resolution
//!
//! # Precedence
//!
//! 1. `AFB_HOME` environment variable (if set and non-blank)
//! 2. `dirs::home_dir()` platform default
//!
//! Tests that touch the global config should point `AFB_HOME` at a temp dir.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the home directory used to locate the global config
///
/// # Errors
///
/// Returns an error if `AFB_HOME` is unset (or blank) and the platform home
/// directory cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("AFB_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}
