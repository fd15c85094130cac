// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the control plane. Interfaces live in the domain
//! layer and are implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Records | Implementations |
//! |-------|---------|----------------|
//! | `TriggerRuleRepository` | `TriggerRule`, `TriggerExecution` | `InMemoryTriggerRuleRepository`, `PostgresTriggerRuleRepository` |
//! | `MissionEventRepository` | `MissionEvent` | `InMemoryMissionEventRepository`, `PostgresMissionEventRepository` |
//! | `RunLifecycleManager` (see `domain::run`) | `MissionRun` | `InMemoryRunManager`, `PostgresRunManager` |
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at startup from configuration
//! (`swarm-config.yaml`). In-memory implementations serve development and
//! tests; PostgreSQL implementations serve production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::events::MissionEvent;
use crate::domain::trigger::{TriggerExecution, TriggerRule};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Trigger rules, their execution audit trail, and the active-run count that
/// feeds the concurrency guard.
#[async_trait]
pub trait TriggerRuleRepository: Send + Sync {
    /// All active rules for the tenant.
    async fn list_active(&self, tenant_id: &str) -> Result<Vec<TriggerRule>, RepositoryError>;

    /// All rules for the tenant, newest first.
    async fn list_all(&self, tenant_id: &str) -> Result<Vec<TriggerRule>, RepositoryError>;

    async fn find_by_id(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<TriggerRule>, RepositoryError>;

    async fn insert(&self, rule: &TriggerRule) -> Result<(), RepositoryError>;

    /// Overwrite the mutable fields of an existing rule. `NotFound` if absent.
    async fn update(&self, rule: &TriggerRule) -> Result<(), RepositoryError>;

    async fn delete(&self, tenant_id: &str, id: &str) -> Result<(), RepositoryError>;

    async fn set_active(
        &self,
        tenant_id: &str,
        id: &str,
        active: bool,
    ) -> Result<(), RepositoryError>;

    async fn update_last_fired(
        &self,
        id: &str,
        fired_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn insert_execution(&self, execution: &TriggerExecution) -> Result<(), RepositoryError>;

    /// Executions for a rule, newest first.
    async fn list_executions(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<TriggerExecution>, RepositoryError>;

    /// Runs of `mission_id` owned by `tenant_id` that are pending or running.
    async fn active_run_count(
        &self,
        tenant_id: &str,
        mission_id: &str,
    ) -> Result<u64, RepositoryError>;
}

/// Mission event audit trail
#[async_trait]
pub trait MissionEventRepository: Send + Sync {
    async fn append(&self, event: &MissionEvent) -> Result<(), RepositoryError>;

    /// Events of a run in emission order.
    async fn run_timeline(&self, run_id: &str) -> Result<Vec<MissionEvent>, RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<MissionEvent>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
