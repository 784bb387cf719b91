//! Errors raised while loading server configuration.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("unknown configuration node: {0}")]
    UnknownNode(String),

    #[error("{0} requires a value")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("{0} is listed more than once")]
    Duplicate(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
