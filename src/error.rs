use std::path::PathBuf;
use thiserror::Error;

/// Failures writing the persisted collection. These are fatal to a run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize collection: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A single fetch that did not produce a body. Logged and skipped by the pipeline.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),
    #[error("{0} must be greater than 0")]
    NotPositive(&'static str),
    #[error("unknown collection kind '{0}'")]
    UnknownKind(String),
    #[error("source '{name}': {reason}")]
    Source { name: String, reason: String },
}
