//! Token endpoint relay.
//!
//! Configured from the environment (and an optional `.env` file). Serves
//! `POST /token` and `GET /.well-known/keys` on `LISTEN_ADDR`.

use std::sync::Arc;

use assertion_relay::{
    config::Config,
    server::{router, AppState},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> assertion_relay::Result<()> {
    let dotenv = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(false);
            error!(error = %e, "invalid configuration");
            return Err(e);
        }
    };
    init_tracing(config.debug);
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }
    info!(
        client_id = %config.client_id,
        token_endpoint = %config.token_endpoint_url(),
        signing_alg = %config.signing_alg,
        "starting"
    );

    let state = match AppState::new(&config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!(error = %e, "startup failed");
            return Err(e);
        }
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
