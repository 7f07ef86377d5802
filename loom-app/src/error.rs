//! Error types for the application layer.

use loom_plugin_host::PluginHostError;
use loom_state::StateError;
use loom_storage::StorageError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Plugin(#[from] PluginHostError),

    #[error("invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
