//! # Flowgate - Demo Server Entry Point
//!
//! Wires the library into a runnable gateway: loads the route configuration,
//! publishes the initial snapshot, serves a small axum app behind the
//! flow-control middleware, and refreshes the active routes whenever the
//! configuration file changes on disk. Refresh failures are logged and leave
//! the previous configuration serving traffic.

use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::{middleware, Router};
use tokio::signal;
use tracing::{error, info};

use flowgate::dispatch::Dispatcher;
use flowgate::middleware::flow_control;
use flowgate::{ConfigManager, InMemoryAdmissionEngine, PredicateRegistry, SnapshotManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_observability();

    info!("Starting flowgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FLOWGATE_CONFIG").ok())
        .unwrap_or_else(|| "flowgate.yaml".to_string());

    let config_manager = ConfigManager::new(&config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let registry = Arc::new(PredicateRegistry::with_defaults());
    let engine = Arc::new(InMemoryAdmissionEngine::new());
    let snapshots = Arc::new(SnapshotManager::new(registry, engine.clone()));

    let initial = config_manager.get_config().await;
    snapshots
        .initialize(&initial.routes)
        .context("Failed to compile initial route configuration")?;

    spawn_refresh_task(&config_manager, snapshots.clone());

    let dispatcher = Arc::new(Dispatcher::new(snapshots, engine));
    let app = Router::new()
        .route("/", get(|| async { "flowgate up" }))
        .layer(middleware::from_fn_with_state(dispatcher, flow_control));

    let addr = std::env::var("FLOWGATE_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Flowgate shutdown complete");
    Ok(())
}

/// Initialize logging and tracing
fn init_observability() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowgate=info".into()),
        )
        .init();
}

/// Refresh the active routes on every configuration change event
///
/// A failed refresh (bad predicate name, bind error) is operator-visible only:
/// it is logged and the previously published snapshot keeps serving.
fn spawn_refresh_task(config_manager: &ConfigManager, snapshots: Arc<SnapshotManager>) {
    let mut changes = config_manager.subscribe_to_changes();
    tokio::spawn(async move {
        while let Ok(event) = changes.recv().await {
            match snapshots.refresh(&event.config.routes) {
                Ok(()) => info!("Flow control rules updated"),
                Err(e) => error!("Configuration refresh failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
