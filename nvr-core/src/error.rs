use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("must have at least one stream")]
    NoInputs,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
