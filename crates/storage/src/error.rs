use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("core error: {0}")]
    Core(#[from] storefront_core::CoreError),
}

impl StorageError {
    /// True when the request never reached the backend because its input was
    /// invalid.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Core(storefront_core::CoreError::Validation(_)))
    }
}
