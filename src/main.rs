mod app_state;
mod completion;
mod config;
mod error;
mod routes;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_state::AppState;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignored silently if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vision_bridge=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let addr: SocketAddr = config.addr().parse().context("Invalid bind address")?;
    let state = Arc::new(AppState::new(config, http_client));

    if !state.completion.has_api_key() {
        tracing::warn!(
            "{} is not set in the environment or {}; requests will answer with an error",
            config::API_KEY_VAR,
            state.config.key_file.display()
        );
    }
    if let Some(origin) = &state.config.cors_origin {
        tracing::info!(%origin, "CORS enabled");
    }

    let app = routes::router(state);

    tracing::info!("vision-bridge listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping");
}
