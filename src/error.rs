use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LumiError>;

#[derive(Debug, Error)]
pub enum LumiError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("config [{section}] {key}: {message}")]
    Config {
        section: String,
        key: String,
        message: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("invalid cache key `{0}`, expected run_section")]
    InvalidKey(String),

    #[error("negative luminosity for {key}: delivered={delivered}, recorded={recorded}")]
    NegativeLumi {
        key: String,
        delivered: f64,
        recorded: f64,
    },

    #[error("invalid timestamp `{0}`")]
    Timestamp(String),

    #[error("table error: {0}")]
    Table(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plot error: {0}")]
    Plot(String),
}

impl LumiError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LumiError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(section: &str, key: &str, message: impl Into<String>) -> Self {
        LumiError::Config {
            section: section.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }
}
