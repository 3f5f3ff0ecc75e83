use thiserror::Error;

use crate::config::ConfigError;
use crate::ingest::IngestError;
use crate::store::StoreError;

/// Top-level error for the command line tool.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown project {0}")]
    UnknownProject(String),
    #[error("{0}")]
    Usage(String),
}
