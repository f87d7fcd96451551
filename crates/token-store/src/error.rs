//! Error types for credential storage

/// Errors from credential storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("credential already exists: {0}")]
    AlreadyExists(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;
