use rust_keys_server::config::Config;
use rust_keys_server::handlers::AppState;
use rust_keys_server::routes::build_router;
use rust_keys_server::service::KeysService;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the keys server.
///
/// Initializes logging, loads configuration and reference data, then serves
/// the keys endpoints until interrupted.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_keys_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Reference data is read once here; requests never touch the files.
    let service = KeysService::initialize(&config)
        .map_err(|e| anyhow::anyhow!("failed to load reference data: {}", e))?;
    let model = service.model();
    tracing::info!("✓ Serving model {}", model);

    let app_state = Arc::new(AppState {
        service,
        config: config.clone(),
    });
    let app = build_router(app_state)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
