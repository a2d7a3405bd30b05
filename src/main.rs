use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use dispatch_console::api;
use dispatch_console::config::Config;
use dispatch_console::console::DispatchConsole;
use dispatch_console::error::AppError;
use dispatch_console::observability::metrics::Metrics;
use dispatch_console::source::rest::RestSource;
use dispatch_console::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let metrics = Metrics::new();
    let source = RestSource::new(config.backend.clone())
        .map_err(|err| AppError::Internal(format!("failed to build backend client: {err}")))?;

    tracing::info!(backend = %config.backend.url, "mounting dispatch console");
    let console = Arc::new(
        DispatchConsole::mount(Arc::new(source), config.console.clone(), metrics.clone()).await,
    );

    let app = api::rest::router(Arc::new(AppState::new(console.clone(), metrics)));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")));

    console.unmount().await;
    tracing::info!("dispatch console unmounted");

    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
