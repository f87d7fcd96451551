//! Reddit OAuth authorization-code client
//!
//! Provides anti-forgery state tokens, authorization URL construction and
//! the server-side code exchange. This crate has no dependency on the web
//! service and holds no storage; persisting the resulting credential is the
//! caller's job.
//!
//! Login flow:
//! 1. Service calls `StateRegistry::issue()` for a fresh `state`
//! 2. User is sent to `ExchangeClient::build_authorization_url()`
//! 3. Callback presents `state`; service calls `StateRegistry::consume()`
//! 4. Service calls `ExchangeClient::exchange()` with the returned code

pub mod constants;
pub mod error;
pub mod state;
pub mod token;

pub use constants::*;
pub use error::{Error, ExchangeError, Result};
pub use state::{DEFAULT_STATE_TTL, StateCheck, StateRegistry};
pub use token::{DEFAULT_EXCHANGE_TIMEOUT, ExchangeClient, TokenResponse};
