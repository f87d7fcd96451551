//! Login initiation and callback handling
//!
//! `AuthFlow` ties the state registry, the exchange client and the token
//! store together. It keeps no per-login state of its own: a callback is
//! correlated with its login only through the `state` parameter, so one
//! instance serves every concurrent request.
//!
//! Callback decision order:
//! 1. query string undecodable    -> `MalformedQuery`
//! 2. `error` present             -> `UpstreamDenied`
//! 3. `code` missing or empty     -> `MissingCode`
//! 4. `state` missing or empty    -> `MissingState`
//! 5. `state` not outstanding     -> `InvalidState`
//! 6. exchange fails              -> `ExchangeFailed`
//! 7. credential write fails      -> `PersistFailed`
//! 8. otherwise                   -> `Success`

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use common::Secret;
use reddit_oauth::{ExchangeClient, ExchangeError, StateCheck, StateRegistry, TokenResponse};
use reqwest::Url;
use serde::Deserialize;
use token_store::{Credential, TokenStore};
use tracing::{debug, error, info, warn};

use crate::metrics;

/// Reddit application identity used for every exchange.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_url: String,
}

/// Query parameters Reddit appends to the redirect URL.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub error: Option<String>,
    pub code: Option<String>,
    pub state: Option<String>,
}

/// A freshly issued login link.
#[derive(Debug)]
pub struct LoginStart {
    pub state: String,
    pub authorization_url: Url,
}

/// Terminal state of one callback.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Query string could not be decoded (duplicate keys, bad encoding)
    MalformedQuery { reason: String },
    /// Reddit redirected back with `error=...` (user declined, bad scope, ...)
    UpstreamDenied { error: String },
    MissingCode,
    MissingState,
    /// Unknown, replayed or expired `state`
    InvalidState,
    ExchangeFailed(ExchangeError),
    /// Exchange succeeded but the credential could not be written
    PersistFailed(token_store::Error),
    Success {
        credential_id: String,
        token: TokenResponse,
    },
}

impl CallbackOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            CallbackOutcome::MalformedQuery { .. }
            | CallbackOutcome::UpstreamDenied { .. }
            | CallbackOutcome::MissingCode
            | CallbackOutcome::MissingState
            | CallbackOutcome::InvalidState => StatusCode::BAD_REQUEST,
            CallbackOutcome::ExchangeFailed(ExchangeError::RateLimited) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            CallbackOutcome::ExchangeFailed(_) => StatusCode::BAD_GATEWAY,
            CallbackOutcome::PersistFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CallbackOutcome::Success { .. } => StatusCode::OK,
        }
    }

    /// Stable label for metrics and the JSON error `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            CallbackOutcome::MalformedQuery { .. } => "malformed_query",
            CallbackOutcome::UpstreamDenied { .. } => "upstream_denied",
            CallbackOutcome::MissingCode => "missing_code",
            CallbackOutcome::MissingState => "missing_state",
            CallbackOutcome::InvalidState => "invalid_state",
            CallbackOutcome::ExchangeFailed(ExchangeError::RateLimited) => "rate_limited",
            CallbackOutcome::ExchangeFailed(_) => "exchange_failed",
            CallbackOutcome::PersistFailed(_) => "persist_failed",
            CallbackOutcome::Success { .. } => "success",
        }
    }

    /// Message shown to the end user. Never includes upstream response data.
    pub fn user_message(&self) -> &'static str {
        match self {
            CallbackOutcome::MalformedQuery { .. } => "Malformed callback",
            CallbackOutcome::UpstreamDenied { .. } => "Unable to authenticate",
            CallbackOutcome::MissingCode => "Missing code",
            CallbackOutcome::MissingState => "Missing state",
            CallbackOutcome::InvalidState => "Unrecognised state",
            CallbackOutcome::ExchangeFailed(ExchangeError::RateLimited) => {
                "Reddit is rate limiting logins right now, please try again later"
            }
            CallbackOutcome::ExchangeFailed(_) | CallbackOutcome::PersistFailed(_) => {
                "Unexpected error"
            }
            CallbackOutcome::Success { .. } => "Logged in",
        }
    }
}

/// Login flow controller.
pub struct AuthFlow {
    states: Arc<StateRegistry>,
    exchange: ExchangeClient,
    store: Arc<TokenStore>,
    client: ClientCredentials,
}

impl AuthFlow {
    pub fn new(
        states: Arc<StateRegistry>,
        exchange: ExchangeClient,
        store: Arc<TokenStore>,
        client: ClientCredentials,
    ) -> Self {
        Self {
            states,
            exchange,
            store,
            client,
        }
    }

    /// Issue a state token and the authorization URL that carries it.
    pub async fn begin_login(&self) -> LoginStart {
        let state = self.states.issue().await;
        let authorization_url = self.exchange.build_authorization_url(
            &self.client.client_id,
            &self.client.redirect_url,
            &state,
        );
        metrics::record_login_started();
        info!("login initiated");
        LoginStart {
            state,
            authorization_url,
        }
    }

    /// Run the callback protocol to a terminal outcome. Logs exactly once.
    pub async fn handle_callback(&self, params: CallbackParams) -> CallbackOutcome {
        let outcome = self.run_callback(params).await;
        finish(outcome)
    }

    /// Terminal outcome for a callback whose query string did not decode.
    /// No state is consumed.
    pub fn reject_malformed_callback(&self, reason: String) -> CallbackOutcome {
        finish(CallbackOutcome::MalformedQuery { reason })
    }

    async fn run_callback(&self, params: CallbackParams) -> CallbackOutcome {
        if let Some(error) = params.error {
            return CallbackOutcome::UpstreamDenied { error };
        }
        let Some(code) = params.code.filter(|c| !c.is_empty()) else {
            return CallbackOutcome::MissingCode;
        };
        let Some(state) = params.state.filter(|s| !s.is_empty()) else {
            return CallbackOutcome::MissingState;
        };

        // Lock is released before the network call below
        if self.states.consume(&state).await == StateCheck::Invalid {
            return CallbackOutcome::InvalidState;
        }

        let started = Instant::now();
        let result = self
            .exchange
            .exchange(
                &code,
                &self.client.redirect_url,
                &self.client.client_id,
                self.client.client_secret.expose(),
            )
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        let token = match result {
            Ok(token) => {
                metrics::record_exchange("ok", elapsed);
                token
            }
            Err(e) => {
                metrics::record_exchange(e.kind(), elapsed);
                return CallbackOutcome::ExchangeFailed(e);
            }
        };

        let credential = Credential {
            id: uuid::Uuid::new_v4().to_string(),
            access_token: token.access_token.clone(),
            expiry: expiry_from(Utc::now(), token.expires_in),
            refresh_token: token.refresh_token.clone(),
        };
        if let Err(e) = self.store.insert(&credential).await {
            return CallbackOutcome::PersistFailed(e);
        }

        CallbackOutcome::Success {
            credential_id: credential.id,
            token,
        }
    }

    /// Logins still redeemable. Expired tokens are purged first so the count
    /// reported by /health never includes abandoned logins.
    pub async fn outstanding_logins(&self) -> usize {
        let purged = self.states.purge_expired().await;
        if purged > 0 {
            debug!(purged, "dropped expired state tokens");
        }
        self.states.len().await
    }

    pub async fn stored_credentials(&self) -> token_store::Result<usize> {
        self.store.len().await
    }
}

/// Absolute expiry as RFC 3339 UTC, saturating on absurd `expires_in`.
fn expiry_from(now: DateTime<Utc>, expires_in: u64) -> String {
    i64::try_from(expires_in)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn finish(outcome: CallbackOutcome) -> CallbackOutcome {
    log_outcome(&outcome);
    metrics::record_callback(outcome.kind());
    outcome
}

fn log_outcome(outcome: &CallbackOutcome) {
    let kind = outcome.kind();
    match outcome {
        CallbackOutcome::MalformedQuery { reason } => {
            info!(outcome = kind, reason = %reason, "callback rejected");
        }
        CallbackOutcome::UpstreamDenied { error } => {
            info!(outcome = kind, upstream_error = %error, "authorization denied by provider");
        }
        CallbackOutcome::MissingCode
        | CallbackOutcome::MissingState
        | CallbackOutcome::InvalidState => {
            info!(outcome = kind, "callback rejected");
        }
        CallbackOutcome::ExchangeFailed(ExchangeError::UpstreamRejected { status, body }) => {
            warn!(outcome = kind, %status, upstream_body = %body, "token exchange rejected");
        }
        CallbackOutcome::ExchangeFailed(ExchangeError::Transport(msg)) => {
            error!(outcome = kind, error = %msg, "token exchange request failed");
        }
        CallbackOutcome::ExchangeFailed(e) => {
            warn!(outcome = kind, error = %e, "token exchange failed");
        }
        CallbackOutcome::PersistFailed(e) => {
            error!(outcome = kind, error = %e, "failed to store credential");
        }
        CallbackOutcome::Success { credential_id, .. } => {
            info!(outcome = kind, %credential_id, "login completed, credential stored");
        }
    }
}
