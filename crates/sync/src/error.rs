#![forbid(unsafe_code)]

use ps_core::ClockError;
use ps_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("changeset references unknown table: {0}")]
    UnknownTable(String),
    #[error("clock: {0}")]
    Clock(#[from] ClockError),
    #[error("invalid change: {0}")]
    InvalidChange(&'static str),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config {key}: {message}")]
    Config { key: &'static str, message: String },
}
