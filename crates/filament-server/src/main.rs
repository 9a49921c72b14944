// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filament worker binary: HTTP ingress plus the self-triggering stack
//! processor over the configured durable store.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use filament_core::Config;
use filament_server::{AppState, http, setup};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        http_port = config.http_port,
        self_url = %config.self_url,
        services = config.service_urls.len(),
        "starting filament worker"
    );

    // Task registration point for a deployment. The stock binary ships no
    // tasks; embedders wire their own through `setup::build_engine`.
    let engine = setup::build_engine(&config, |builder| builder).await?;
    if config.trigger_secret.is_empty() {
        warn!("FILAMENT_TRIGGER_SECRET is empty; internal routes are unauthenticated");
    }

    let state = Arc::new(AppState::new(engine, config.trigger_secret.clone()));
    let router = http::create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "ingress listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    info!("filament worker stopped");
    Ok(())
}
