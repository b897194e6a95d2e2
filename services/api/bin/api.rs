//! Main Entrypoint for the Gemini Live Avatar API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the system instruction and building the upstream and aligner clients.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use avatar_api::{
    config::{Config, load_system_instruction},
    router::create_router,
    state::AppState,
    ws::upstream::GeminiConnector,
};
use avatar_core::HttpWordAligner;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 2. Initialize Shared Services ---
    let system_instruction = load_system_instruction(&config.prompts_path)?;
    let upstream = Arc::new(GeminiConnector::new(
        &config.gemini_api_key,
        config.gemini_live_url.as_deref(),
    ));
    let aligner = Arc::new(
        HttpWordAligner::new(config.aligner_url.clone()).with_timeout(config.aligner_timeout),
    );

    let bind_address = config.bind_address;
    let app_state = Arc::new(AppState::new(
        config,
        system_instruction,
        upstream,
        aligner,
    ));

    // --- 3. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state.clone()).layer(cors);

    // --- 4. Start Server ---
    info!(%bind_address, "Service configured. Starting server...");
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!(
        sessions = app_state.registry.len().await,
        "Server stopped accepting connections. Ending live sessions..."
    );
    app_state.shutdown().await;
    info!("Server has shut down.");
    Ok(())
}
