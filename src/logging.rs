//! Logging configuration using tracing.

use crate::error::LifeboatError;
use crate::Result;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to stderr, and to `file` when given.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| LifeboatError::config(format!("failed to initialise logging: {e}")))
}

/// Level name for the CLI flags; `None` keeps the configured level
pub fn level_override(verbose: bool, quiet: bool) -> Option<&'static str> {
    if verbose {
        Some("debug")
    } else if quiet {
        Some("warn")
    } else {
        None
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
