use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quotagate::clock::SystemClock;
use quotagate::config::QuotagateConfig;
use quotagate::http::{admin_router, GateLayer, HeaderIdentityResolver, RouteTable};
use quotagate::limiter::MultiTierGate;
use quotagate::policy::PolicyTable;
use quotagate::store::RedisStore;

#[derive(Debug, Parser)]
#[command(name = "quotagate", about = "Multi-tier distributed rate limiting gate")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting Quotagate Rate Limiting Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = match args.config {
        Some(path) => QuotagateConfig::from_file(&path)?,
        None => QuotagateConfig::default(),
    };
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Boot-time validation: a missing (operation, tier) row rejects boot
    let policy = PolicyTable::new(&config.limits.policies, config.limits.secondary)?;

    let store = Arc::new(
        RedisStore::connect(
            &config.store.url,
            Duration::from_millis(config.store.timeout_ms),
        )
        .await?,
    );
    let gate = Arc::new(MultiTierGate::new(policy, store, Arc::new(SystemClock)));
    info!("Multi-tier gate initialized");

    let gate_layer = GateLayer::new(
        gate.clone(),
        Arc::new(HeaderIdentityResolver),
        RouteTable::default(),
    );

    // Gated business routes sit behind the gate layer; the admin routes
    // and health check do not.
    let gated = Router::new()
        .route("/api/journals/suggest", post(placeholder))
        .route("/api/imports/csv", post(placeholder))
        .route("/api/predictions", post(placeholder))
        .route("/api/reports/export", post(placeholder))
        .layer(gate_layer);

    let app = Router::new()
        .merge(gated)
        .merge(admin_router(gate.clone()))
        .route("/health", get(health));

    info!("Starting HTTP server on {}", config.server.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!(
        degraded_events = gate.degraded_events(),
        "Quotagate Rate Limiting Gate stopped"
    );
    Ok(())
}

/// Stand-in for the business logic the gate protects.
async fn placeholder() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
