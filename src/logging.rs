//! Logging setup
//!
//! Initializes the global tracing subscriber from config: level filter,
//! file sink, and an optional stdout mirror.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::error::Result;

/// Map a configured level name to a tracing filter directive.
///
/// FATAL has no tracing equivalent and maps to `error`.
fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARN" => "warn",
        "ERROR" | "FATAL" => "error",
        _ => "info",
    }
}

/// Initialize the global subscriber.
///
/// Honors `RUST_LOG` when set; otherwise uses the configured `log_level`.
/// Returns without error if a subscriber is already installed (tests).
pub fn init(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&config.log_level)));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;
    let file = Arc::new(file);

    if config.enable_console {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stdout.and(file))
            .with_ansi(false)
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .try_init();
    }

    Ok(())
}
