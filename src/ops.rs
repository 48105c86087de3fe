//! Operational plumbing shared by the binaries
//!
//! Logging initialization and the optional health/ops HTTP listener.

use crate::error::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
pub fn init_logging(level: &str, json: bool) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("h2=warn".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Serve `/healthz` and `/readyz` on the given address until the process
/// exits. Spawned only when an ops bind address is configured.
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "ops server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
