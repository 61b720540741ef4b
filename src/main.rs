//! GraphWiki API - Knowledge Graph Wiki Tool
//!
//! Backend for a collaborative knowledge-graph wiki: a TypeDB-backed
//! HTTP API plus a WebSocket broadcast channel for live clients.
//!
//! The TypeDB connection is established lazily on the first query, so the
//! server boots and serves health checks even while the database is still
//! coming up.

mod config;
mod db;
mod error;
mod realtime;
mod routes;
mod state;

use crate::routes::create_router;
use crate::state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting GraphWiki API...");

    // Load configuration. Production with insecure default secrets refuses
    // to start here.
    let settings = match config::get_settings() {
        Ok(settings) => settings,
        Err(config_error) => {
            error!("❌ FATAL: invalid configuration: {}", config_error);
            return Err(config_error.into());
        }
    };
    info!(
        "📋 Configuration loaded (environment: {}, debug: {})",
        settings.environment, settings.debug
    );

    let insecure = settings.insecure_defaults();
    if !insecure.is_empty() {
        warn!(
            "⚠️  Insecure default values in use for: {}. Change these before deploying to production.",
            insecure.join(", ")
        );
    }
    if settings.is_authentik_configured() {
        info!("🔐 Authentik SSO configured (issuer: {})", settings.authentik_issuer);
    }
    if settings.openai_api_key.is_some() {
        info!("🤖 OpenAI API key present, AI features available");
    }

    // The TypeDB client connects on first use.
    let state = Arc::new(AppState::new(Arc::clone(&settings)));
    info!(
        "✅ TypeDB gateway ready (server: {}, database: {})",
        settings.typedb_address(),
        settings.typedb_database_name
    );

    // Build the router
    let app = create_router(Arc::clone(&state));

    let address = settings.server_address();
    info!("🌐 Server listening on http://{}", address);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /        - service status with a TypeDB data sample");
    info!("   GET  /health  - health and connection diagnostics");
    info!("   GET  /ws      - real-time broadcast channel (WebSocket)");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(&address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.db.close().await;
    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,graphwiki_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
