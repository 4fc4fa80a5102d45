//! Error types for homeseq-core.

use thiserror::Error;

/// All errors that can surface from the homeseq core library.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse configuration file: {0}")]
    ConfigParse(#[from] ini::Error),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage inconsistency: {0}")]
    Storage(String),

    #[error("cannot merge incompatible event sequences")]
    IncompatibleMerge,

    #[error("no events available for group '{0}'")]
    EmptyStream(String),

    #[error("delay calibration for group '{group}' did not converge within t_max={t_max}")]
    NonConvergent { group: String, t_max: u64 },

    #[error("logging already initialized")]
    LoggingAlreadyInitialized,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
