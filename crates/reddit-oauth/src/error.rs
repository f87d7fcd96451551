//! Error types for the Reddit OAuth client

use reqwest::StatusCode;

/// Errors constructing an exchange client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint URL {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// Result alias for client construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of the authorization-code exchange.
///
/// `Display` output is safe to log but is still not meant for end users; the
/// upstream body in `UpstreamRejected` is deliberately kept out of it.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("token endpoint rate limited the exchange")]
    RateLimited,

    #[error("token endpoint rejected the exchange with {status}")]
    UpstreamRejected { status: StatusCode, body: String },

    #[error("token endpoint returned an unreadable response: {0}")]
    MalformedResponse(String),

    #[error("token exchange request failed: {0}")]
    Transport(String),
}

impl ExchangeError {
    /// Short stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::RateLimited => "rate_limited",
            ExchangeError::UpstreamRejected { .. } => "upstream_rejected",
            ExchangeError::MalformedResponse(_) => "malformed_response",
            ExchangeError::Transport(_) => "transport",
        }
    }
}
