use storefront_core::{CoreError, RecordId};
use storefront_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("entity not found: {0}")]
    NotFound(RecordId),

    #[error("remote error: {0}")]
    Remote(#[from] StorageError),

    #[error("core error: {0}")]
    Core(CoreError),

    #[error("invalid config: {0}")]
    Config(String),
}

impl From<CoreError> for EngineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) => Self::Validation(msg),
            other => Self::Core(other),
        }
    }
}
