//! Kurve Server - entry point
//!
//! Loads configuration, installs tracing and serves the HTTP and WebSocket
//! routes until Ctrl+C or SIGTERM.

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kurve_server::app::AppState;
use kurve_server::config::Config;
use kurve_server::http::build_router;
use kurve_server::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level);
    init_server_time();

    info!("Starting Kurve Server");
    info!(
        mode = %config.game.mode,
        min_players = config.game.min_players,
        max_players = config.game.max_players,
        "Game settings"
    );

    let state = AppState::new(config.clone());
    let registry = state.registry.clone();
    let router = build_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;

    info!("Server listening on {}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);
    info!("WebSocket endpoint: ws://{}/ws", config.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            registry.shutdown_all().await;
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
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
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
