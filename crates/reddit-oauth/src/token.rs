//! Authorization URL construction and code-for-token exchange
//!
//! The exchange POSTs the authorization code to `TOKEN_ENDPOINT` with HTTP
//! Basic client authentication and classifies the outcome into
//! `ExchangeError` so the caller can map each failure mode to its own
//! response. Nothing here retries; a failed exchange is reported once.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::constants::{AUTHORIZE_ENDPOINT, DURATION, SCOPES, TOKEN_ENDPOINT};
use crate::error::{Error, ExchangeError, Result};

/// Default per-request timeout for the exchange call.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Successful token endpoint response.
///
/// `expires_in` is a delta in seconds from the response time. Reddit only
/// returns `refresh_token` for `duration=permanent` grants.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// OAuth error document, logged when it shows up on a success status.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for the Reddit authorization server.
///
/// Holds no per-login state; one instance serves every request.
#[derive(Clone)]
pub struct ExchangeClient {
    http: reqwest::Client,
    authorize_url: Url,
    token_url: Url,
    timeout: Duration,
}

impl ExchangeClient {
    /// Client targeting Reddit's production endpoints.
    pub fn new(http: reqwest::Client, timeout: Duration) -> Result<Self> {
        Self::with_endpoints(http, AUTHORIZE_ENDPOINT, TOKEN_ENDPOINT, timeout)
    }

    /// Client targeting arbitrary endpoints (local mock servers in tests).
    pub fn with_endpoints(
        http: reqwest::Client,
        authorize_endpoint: &str,
        token_endpoint: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http,
            authorize_url: parse_endpoint(authorize_endpoint)?,
            token_url: parse_endpoint(token_endpoint)?,
            timeout,
        })
    }

    /// Build the URL the user's browser is sent to.
    ///
    /// Deterministic: the same inputs always yield the same URL.
    pub fn build_authorization_url(&self, client_id: &str, redirect_uri: &str, state: &str) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("state", state)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("duration", DURATION)
            .append_pair("scope", SCOPES);
        url
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `redirect_uri` must match the one used in the authorization URL.
    #[instrument(skip_all, fields(token_url = %self.token_url))]
    pub async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
        client_id: &str,
        client_secret: &str,
    ) -> std::result::Result<TokenResponse, ExchangeError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .header(
                reqwest::header::AUTHORIZATION,
                basic_auth_header(client_id, client_secret),
            )
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited);
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(ExchangeError::UpstreamRejected { status, body });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transport(format!("reading token response: {e}")))?;

        match serde_json::from_str::<TokenResponse>(&body) {
            Ok(token) => {
                debug!(
                    token_type = %token.token_type,
                    expires_in = token.expires_in,
                    scope = %token.scope,
                    "token exchange succeeded"
                );
                Ok(token)
            }
            Err(parse_err) => {
                // A 2xx carrying `{"error":..}` is still malformed; keep the
                // provider's code for the log only.
                if let Ok(ErrorBody { error }) = serde_json::from_str::<ErrorBody>(&body) {
                    debug!(upstream_error = %error, "token endpoint returned an error document");
                }
                Err(ExchangeError::MalformedResponse(parse_err.to_string()))
            }
        }
    }
}

/// `Basic base64(client_id:client_secret)`
fn basic_auth_header(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{client_id}:{client_secret}"))
    )
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidEndpoint {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::InvalidEndpoint {
            url: raw.to_string(),
            reason: "scheme must be http or https".into(),
        });
    }
    Ok(url)
}
