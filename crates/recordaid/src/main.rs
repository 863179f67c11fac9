use anyhow::{Context, Result};
use recordaid::api::{create_router, handlers::AppState};
use recordaid::backend::Backends;
use recordaid::config::Config;
use recordaid::engine;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("recordaid=info,tower_http=info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "recordaid starting");

    let config = Config::load().context("loading configuration")?;
    let store = config.open_store().await.context("opening people store")?;
    match store.count().await {
        Ok(n) => tracing::info!(store = store.name(), records = n, "people store ready"),
        Err(e) => tracing::warn!(store = store.name(), error = %e, "people store not answering yet"),
    }

    let engine = engine::spawn_engine(recordaid::ENGINE_QUEUE_DEPTH)?;
    let backends = Backends::from_config(&config, Arc::new(store), engine)?;
    let app = create_router(AppState::new(backends, config.max_body_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "recordaid ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    tracing::info!("recordaid shutting down");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
