//! HTTP surface
//!
//! Endpoints:
//! - GET /               : sign-in page linking to Reddit's authorization URL
//! - GET /login          : 303 redirect straight to the authorization URL
//! - GET /auth/callback  : OAuth redirect target; exchanges the code
//! - GET /health         : liveness and storage reachability
//! - GET /metrics        : Prometheus text exposition

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::warn;

use crate::flow::{AuthFlow, CallbackOutcome, CallbackParams};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<AuthFlow>,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

/// Build the router. `max_connections` caps concurrently served requests.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// JSON error body: {"error":{"type":"...","message":"..."}}
fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// GET /: every page view issues a fresh state token.
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    let login = state.flow.begin_login().await;
    let href = login
        .authorization_url
        .as_str()
        .replace('&', "&amp;")
        .replace('"', "&quot;");
    Html(format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Sign in</title></head>
<body>
<a href="{href}">Sign in with Reddit</a>
</body>
</html>
"#
    ))
}

/// GET /login
async fn login_handler(State(state): State<AppState>) -> Redirect {
    let login = state.flow.begin_login().await;
    Redirect::to(login.authorization_url.as_str())
}

/// GET /auth/callback
///
/// An undecodable query string still goes through the flow so it gets the
/// same JSON body, log line and metric as every other rejection.
async fn callback_handler(
    State(state): State<AppState>,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Response {
    let outcome = match query {
        Ok(Query(params)) => state.flow.handle_callback(params).await,
        Err(rejection) => state.flow.reject_malformed_callback(rejection.body_text()),
    };
    match outcome {
        CallbackOutcome::Success {
            credential_id,
            token,
        } => (
            StatusCode::OK,
            axum::Json(serde_json::json!({
                "status": "authenticated",
                "credential_id": credential_id,
                "token": token,
            })),
        )
            .into_response(),
        other => error_response(other.status(), other.kind(), other.user_message()),
    }
}

/// GET /health: 200 when the credential store answers, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let pending_logins = state.flow.outstanding_logins().await;

    let (status_code, body) = match state.flow.stored_credentials().await {
        Ok(credentials) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "uptime_seconds": uptime,
                "pending_logins": pending_logins,
                "credentials_stored": credentials,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check could not reach token store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "degraded",
                    "uptime_seconds": uptime,
                    "pending_logins": pending_logins,
                }),
            )
        }
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
