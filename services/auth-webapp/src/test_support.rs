//! Shared fixtures: a mock Reddit token endpoint and a wired-up `AuthFlow`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use common::Secret;
use reddit_oauth::{AUTHORIZE_ENDPOINT, ExchangeClient, StateRegistry};
use token_store::TokenStore;
use tokio::net::TcpListener;

use crate::flow::{AuthFlow, ClientCredentials};

pub(crate) const SUCCESS_BODY: &str = r#"{"access_token":"tok","token_type":"bearer","expires_in":3600,"scope":"submit","refresh_token":"r1"}"#;

/// Number of requests the mock token endpoint has received.
#[derive(Clone, Default)]
pub(crate) struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Start a mock token endpoint answering every POST with `status` and `body`.
pub(crate) async fn start_token_server(status: StatusCode, body: &'static str) -> (String, Hits) {
    let hits = Hits::default();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/api/v1/access_token", listener.local_addr().unwrap());

    let counter = hits.clone();
    let app = axum::Router::new().route(
        "/api/v1/access_token",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.0.fetch_add(1, Ordering::SeqCst);
                (
                    status,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
            }
        }),
    );

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (url, hits)
}

/// An `AuthFlow` backed by an in-memory store and the given token endpoint.
pub(crate) fn test_flow(token_url: &str) -> (AuthFlow, Arc<TokenStore>) {
    let store = Arc::new(TokenStore::open(":memory:").unwrap());
    let exchange = ExchangeClient::with_endpoints(
        reqwest::Client::new(),
        AUTHORIZE_ENDPOINT,
        token_url,
        Duration::from_secs(5),
    )
    .unwrap();
    let flow = AuthFlow::new(
        Arc::new(StateRegistry::default()),
        exchange,
        store.clone(),
        ClientCredentials {
            client_id: "app-id".into(),
            client_secret: Secret::new("app-secret".into()),
            redirect_url: "http://localhost:8080/auth/callback".into(),
        },
    );
    (flow, store)
}
