//! TaskHub server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use taskhub_core::api;
use taskhub_core::app::TaskHub;
use taskhub_core::config::Config;
use taskhub_core::execution::ReqwestSender;
use taskhub_core::store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load config: {e}. Using defaults.");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        cfg
    });

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting taskhub server");

    let store = match &config.database.migrations_dir {
        Some(dir) => Arc::new(SqliteStore::open_with_migrations_dir(&config.database.db_path, dir).await?),
        None => Arc::new(SqliteStore::open(&config.database.db_path).await?),
    };
    tracing::info!(db = %config.database.db_path, "database ready");

    let hub = TaskHub::new(config.clone(), store.clone(), store, Arc::new(ReqwestSender));
    hub.start();

    let app = api::build_router(hub.clone());
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "starting http server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    hub.shutdown().await;
    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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

    tracing::info!("shutdown signal received");
}
