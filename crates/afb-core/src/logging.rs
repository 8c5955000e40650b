//! Tracing subscriber setup for processes embedding the bus.
//!
//! The bus itself only emits `tracing` events; installing a subscriber is
//! the host process's choice.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

fn parse_level(value: &str) -> tracing::Level {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

fn resolve_level(default_level: &str) -> tracing::Level {
    let value = std::env::var("AFB_LOG").unwrap_or_else(|_| default_level.to_string());
    parse_level(&value)
}

/// Initialize tracing output, level from `AFB_LOG` (default `info`).
///
/// Safe to call multiple times; only the first call installs a subscriber,
/// and failure to install (another subscriber already set) is ignored.
pub fn init() {
    init_with_default("info");
}

/// Like [`init`], with `default_level` used when `AFB_LOG` is unset,
/// e.g. [`crate::config::LoggingConfig::level`].
pub fn init_with_default(default_level: &str) {
    if INIT.get().is_some() {
        return;
    }
    let level = resolve_level(default_level);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
}
