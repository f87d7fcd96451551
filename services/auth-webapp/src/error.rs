//! Service assembly errors
//!
//! Per-request failures never surface here; the callback handler turns each
//! of them into a `CallbackOutcome` and a response.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("token store unavailable: {0}")]
    Storage(#[from] token_store::Error),

    #[error("OAuth client setup failed: {0}")]
    OAuthClient(#[from] reddit_oauth::Error),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
