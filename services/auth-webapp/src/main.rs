//! Reddit OAuth2 login web app
//!
//! Sends users to Reddit's authorization page, receives the redirect,
//! exchanges the one-time code for tokens and stores the resulting
//! credential in SQLite.

mod config;
mod error;
mod flow;
mod metrics;
mod routes;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reddit_oauth::{ExchangeClient, StateRegistry};
use token_store::TokenStore;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::flow::{AuthFlow, ClientCredentials};
use crate::routes::{AppState, build_router};

/// How long in-flight requests get to finish once a shutdown signal arrives.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("web:reddit-auth-webapp:v", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting reddit-auth-webapp");

    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    if let Some(path) = &config_path {
        info!(path = %path.display(), "loading configuration");
    }
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        sqlite_file = %config.storage.sqlite_file.display(),
        redirect_url = %config.oauth.redirect_url,
        client_id = %config.oauth.client_id,
        "configuration loaded"
    );

    let (flow, store) = assemble(&config).with_context(|| {
        format!(
            "failed to initialize login flow with store {}",
            config.storage.sqlite_file.display()
        )
    })?;

    let app = build_router(
        AppState {
            flow: Arc::new(flow),
            started_at: Instant::now(),
            prometheus,
        },
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    // The router (and with it every other handle on the store) is gone once
    // the server task has finished.
    match Arc::try_unwrap(store) {
        Ok(store) => match store.close() {
            Ok(()) => info!("token store closed"),
            Err(e) => error!(error = %e, "failed to close token store"),
        },
        Err(_) => warn!("token store still in use at shutdown, leaving it to drop"),
    }

    info!("shutdown complete");
    Ok(())
}

/// Open the credential store and wire it to the state registry and exchange
/// client. The returned store handle is what `main` closes at shutdown.
fn assemble(config: &Config) -> error::Result<(AuthFlow, Arc<TokenStore>)> {
    let store = Arc::new(TokenStore::open(&config.storage.sqlite_file)?);

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| error::Error::HttpClient(e.to_string()))?;

    let exchange = ExchangeClient::new(http, config.oauth.exchange_timeout)?;
    let states = Arc::new(StateRegistry::new(config.oauth.state_ttl));

    let flow = AuthFlow::new(
        states,
        exchange,
        store.clone(),
        ClientCredentials {
            client_id: config.oauth.client_id.clone(),
            client_secret: config.oauth.client_secret.clone(),
            redirect_url: config.oauth.redirect_url.clone(),
        },
    );
    Ok((flow, store))
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
