// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `swarmctl serve`: wires the bus, storage and both engines together and
//! runs until a shutdown signal arrives.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use swarm_control_core::domain::config::{ControlPlaneConfig, DatabaseConfig};
use swarm_control_core::domain::events::EventEmitter;
use swarm_control_core::domain::repository::{
    MissionEventRepository, PostgresConfig, TriggerRuleRepository,
};
use swarm_control_core::domain::run::RunLifecycleManager;
use swarm_control_core::infrastructure::db::Database;
use swarm_control_core::infrastructure::repositories::{
    PostgresMissionEventRepository, PostgresRunManager, PostgresTriggerRuleRepository,
};
use swarm_control_core::infrastructure::{AuditEventEmitter, MessageBus};
use swarm_control_reflexes::{Overseer, TriggerEngine, TriggerStore};

/// PostgreSQL-backed collaborators.
struct Storage {
    rules: Arc<dyn TriggerRuleRepository>,
    runs: Arc<dyn RunLifecycleManager>,
    events: Arc<dyn MissionEventRepository>,
}

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config =
        ControlPlaneConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(name = %config.metadata.name, "Configuration loaded");

    if config.spec.observability.metrics.enabled {
        init_metrics(config.spec.observability.metrics.port)?;
    }

    let tenant_id = config.spec.triggers.tenant_id.clone();
    let bus = MessageBus::new(config.spec.bus.capacity);

    let storage = match &config.spec.database {
        Some(db) => Some(connect_storage(db, &tenant_id).await?),
        None => {
            warn!("No database configured; trigger rules and mission events are disabled");
            None
        }
    };

    let emitter: Option<Arc<dyn EventEmitter>> = storage.as_ref().map(|s| {
        Arc::new(AuditEventEmitter::new(
            Some(Arc::clone(&s.events)),
            Some(bus.clone()),
            tenant_id.clone(),
        )) as Arc<dyn EventEmitter>
    });

    let store = Arc::new(
        TriggerStore::for_tenant(storage.as_ref().map(|s| Arc::clone(&s.rules)), &tenant_id)
            .with_execution_history_limit(config.spec.triggers.execution_history_limit),
    );
    let engine = Arc::new(TriggerEngine::new(
        store,
        emitter,
        storage.as_ref().map(|s| Arc::clone(&s.runs)),
        Some(bus.clone()),
    ));

    let overseer = Arc::new(Overseer::new(Some(bus.clone()), &config.spec.overseer));

    overseer.start().context("Failed to start Overseer")?;
    engine
        .start()
        .await
        .context("Failed to start trigger engine")?;

    info!(tenant_id = %tenant_id, "Swarm control plane running");

    shutdown_signal().await;

    info!("Shutting down");
    engine.stop();
    overseer.shutdown();

    Ok(())
}

async fn connect_storage(db: &DatabaseConfig, tenant_id: &str) -> Result<Storage> {
    let database = Database::connect(&PostgresConfig {
        connection_string: db.url.clone(),
        max_connections: db.max_connections,
    })
    .await
    .context("Failed to connect to PostgreSQL")?;

    database
        .apply_schema()
        .await
        .context("Failed to apply database schema")?;

    info!(max_connections = db.max_connections, "Connected to PostgreSQL");

    let pool = database.get_pool().clone();
    Ok(Storage {
        rules: Arc::new(PostgresTriggerRuleRepository::new(pool.clone())),
        runs: Arc::new(PostgresRunManager::new(pool.clone(), tenant_id)),
        events: Arc::new(PostgresMissionEventRepository::new(pool)),
    })
}

fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
