use anyhow::{Context, Result};
use schedule_dispatch::api::{create_router, AppState};
use schedule_dispatch::bus::open_bus;
use schedule_dispatch::config::ServiceConfig;
use schedule_dispatch::store::open_store;
use schedule_dispatch::SchedulePipeline;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schedule_dispatch=info".into()),
        )
        .init();

    info!("Schedule dispatch starting...");

    let config = ServiceConfig::load().context("Failed to load configuration")?;
    info!(
        listen_addr = %config.listen_addr,
        store = %config.store.endpoint,
        bus = %config.bus.url,
        "Configuration loaded"
    );

    let store = open_store(&config.store).context("Failed to open schedule store")?;
    let bus = open_bus(&config.bus)
        .await
        .context("Failed to initialize message bus")?;

    let state = AppState {
        pipeline: SchedulePipeline::new(store, bus),
        max_body_bytes: config.max_body_bytes,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Trigger endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Schedule dispatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
