use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shelfguard::auth::InMemoryIdentityStore;
use shelfguard::{AppState, SecurityConfig, api};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    tracing::info!("starting shelfguard security core");

    // CONFIGURATION: fatal on missing/short/shared secrets, never retried.
    let config = SecurityConfig::from_env()?;
    tracing::info!(
        access_ttl_secs = config.jwt.access_ttl_secs,
        refresh_ttl_secs = config.jwt.refresh_ttl_secs,
        rate_limit_window_ms = config.limits.rate_limit_window_ms,
        rate_limit_max_requests = config.limits.rate_limit_max_requests,
        "configuration loaded"
    );

    // The surrounding application owns the real user store; this process
    // runs with a seed admin so the stats endpoint is reachable.
    let identity = Arc::new(InMemoryIdentityStore::new().with_user("admin", "admin"));

    let state = AppState::new(config, identity)?;
    state.gate.start().await;

    // Revocation records self-expire; sweep them hourly.
    let tokens = Arc::clone(&state.tokens);
    let purge_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            tokens.purge_expired();
        }
    });

    let app = api::router(state.clone());

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);

    tracing::info!("server ready and accepting requests");

    // RELIABILITY: graceful shutdown so in-flight requests complete.
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    purge_task.abort();
    state.gate.stop().await;
    tracing::info!("server shutdown complete");
    Ok(())
}

// Handles both interactive (Ctrl+C) and system (SIGTERM) shutdown signals.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
