// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wiring from configuration to a running engine.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use filament_core::Config;
use filament_core::dispatch::HttpEndpoint;
use filament_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use filament_core::processor::ProcessorConfig;
use filament_core::runtime::{Engine, EngineBuilder};
use filament_core::sweeper::SweeperConfig;
use filament_core::trigger::HttpTrigger;

/// Connect the durable store named by the configuration URL.
///
/// `sqlite:` URLs (and bare paths) get the embedded backend; everything
/// else is treated as PostgreSQL.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn Persistence>> {
    let url = config.database_url.as_str();
    if let Some(path) = url.strip_prefix("sqlite:") {
        let store = SqlitePersistence::from_path(path.trim_start_matches("//"))
            .await
            .context("failed to open SQLite store")?;
        info!(path, "connected to SQLite store");
        Ok(Arc::new(store))
    } else {
        let store = PostgresPersistence::connect(url, config.store_pool_size)
            .await
            .context("failed to connect to PostgreSQL store")?;
        info!("connected to PostgreSQL store");
        Ok(Arc::new(store))
    }
}

/// Assemble an engine from configuration: store, HTTP cascade trigger, and
/// one HTTP endpoint per configured service. `customize` registers the
/// deployment's tasks (and any extra endpoints or shape rules).
pub async fn build_engine(
    config: &Config,
    customize: impl FnOnce(EngineBuilder) -> EngineBuilder,
) -> Result<Arc<Engine>> {
    let store = connect_store(config).await?;

    let trigger = Arc::new(HttpTrigger::new(
        &config.self_url,
        config.trigger_secret.clone(),
        config.dispatch_timeout,
    ));

    let mut builder = Engine::builder()
        .persistence(store)
        .trigger(trigger)
        .processor_config(ProcessorConfig {
            lock_retry_attempts: config.lock_retry_attempts,
            lock_retry_delay: config.lock_retry_delay,
            ..ProcessorConfig::default()
        })
        .sweeper_config(SweeperConfig {
            lock_stale_after: config.lock_stale_after,
            step_stale_after: config.step_stale_after,
        });

    for (service_name, base_url) in &config.service_urls {
        info!(service = %service_name, url = %base_url, "registering endpoint");
        builder = builder.endpoint(
            service_name.clone(),
            Arc::new(HttpEndpoint::new(base_url.clone(), config.dispatch_timeout)),
        );
    }

    let builder = customize(builder);
    let engine = Arc::new(builder.build()?);

    if config.service_urls.is_empty() {
        warn!("no external service endpoints configured");
    }

    Ok(engine)
}
