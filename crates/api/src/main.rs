//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::error::StartupError;
use api::{Pipeline, handlers};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env()?;
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    // 3. Assemble the pipeline and start the timeout sweep
    let pipeline = Arc::new(Pipeline::assemble(
        &config,
        Vec::new(),
        handlers::default_subscriptions(),
    )?);
    let sweeper_token = CancellationToken::new();
    let sweeper = pipeline.spawn_timeout_sweeper(sweeper_token.clone());

    // 4. Build the application and serve
    let app = api::create_app(Arc::clone(&pipeline), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, sink = ?config.sink, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 5. Stop the sweep and drain in-flight deliveries
    sweeper_token.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!(error = %err, "timeout sweeper ended abnormally");
    }
    pipeline.shutdown().await;

    tracing::info!("server shut down gracefully");
    Ok(())
}
