//! Error types for the rebalancer.

use std::path::PathBuf;

/// All errors that can occur during rebalancer operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to read state file {path}: {source}")]
    StateRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    StateWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse state file {path}: {source}")]
    StateParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("strategy {name} failed to initialize: {reason}")]
    Initialization { name: String, reason: String },

    #[error("failed to install interrupt handler: {0}")]
    Interrupt(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Strategy(#[from] volregime::Error),

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
