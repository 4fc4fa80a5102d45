//! Structured logging (C10): a single `tracing` subscriber installed once
//! at startup, with an always-on file sink and an optional stdout sink.
//!
//! This CLI exposes only `--verbose`/`--debug` (matching `SPEC_FULL.md`
//! §4.10's `sys.log` file behavior inherited from the source's
//! `setup_logger`), so the format here is fixed to a human-readable layer;
//! `RUST_LOG` still overrides the level.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration, derived from the CLI's `--verbose`/`--debug` flags.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base level; raised to `debug` when `--debug` is passed.
    pub level: String,
    /// Whether to also attach a human-readable layer on stdout.
    pub verbose: bool,
    /// Always-on file sink path (`sys.log` in the source).
    pub file: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
            file: PathBuf::from("sys.log"),
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        Self {
            level: if debug { "debug".to_string() } else { "info".to_string() },
            verbose,
            file: PathBuf::from("sys.log"),
        }
    }
}

/// Installs the global tracing subscriber. Idempotent-safe: a second call
/// returns `Err(Error::LoggingAlreadyInitialized)` rather than panicking.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(Error::LoggingAlreadyInitialized);
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // `sys.log` is truncated at the start of each run, matching the source's
    // `logging.FileHandler('sys.log', mode='w')`.
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&config.file)?;
    let file_layer = fmt::layer().with_writer(file).with_target(true).with_ansi(false);

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    if config.verbose {
        let stdout_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_ansi(true);
        tracing::subscriber::set_global_default(registry.with(stdout_layer))
            .map_err(|e| Error::Config(format!("failed to install logging subscriber: {e}")))?;
    } else {
        tracing::subscriber::set_global_default(registry)
            .map_err(|e| Error::Config(format!("failed to install logging subscriber: {e}")))?;
    }

    let _ = LOGGING_INITIALIZED.set(true);
    tracing::info!(level = %config.level, verbose = config.verbose, file = %config.file.display(), "logging initialized");
    Ok(())
}
