// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve trigger rules, runs, and mission events
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresTriggerRuleRepository** - Rules, execution audit, active run counts
//! - **PostgresRunManager** - Mission run lifecycle
//! - **PostgresMissionEventRepository** - Mission event audit trail
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for testing and database-less development:
//! - **InMemoryTriggerRuleRepository**
//! - **InMemoryRunManager**
//! - **InMemoryMissionEventRepository**
//!
//! An `InMemoryTriggerRuleRepository` built with [`InMemoryTriggerRuleRepository::with_runs`]
//! answers active run counts from the shared run table, mirroring the
//! PostgreSQL query over `mission_runs`.

pub mod postgres_mission_event;
pub mod postgres_run;
pub mod postgres_trigger;

pub use postgres_mission_event::PostgresMissionEventRepository;
pub use postgres_run::PostgresRunManager;
pub use postgres_trigger::PostgresTriggerRuleRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::events::MissionEvent;
use crate::domain::repository::{MissionEventRepository, RepositoryError, TriggerRuleRepository};
use crate::domain::run::{MissionRun, RunLifecycleManager, RunStatus};
use crate::domain::trigger::{TriggerExecution, TriggerRule, DEFAULT_TENANT_ID};

#[derive(Clone)]
pub struct InMemoryRunManager {
    runs: Arc<RwLock<HashMap<String, MissionRun>>>,
    tenant_id: String,
}

impl InMemoryRunManager {
    pub fn new() -> Self {
        Self::for_tenant(DEFAULT_TENANT_ID)
    }

    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            tenant_id: tenant_id.into(),
        }
    }

    /// Store a run as-is, replacing any run with the same id.
    pub fn insert(&self, run: MissionRun) {
        self.runs.write().insert(run.id.clone(), run);
    }

    pub fn active_count(&self, tenant_id: &str, mission_id: &str) -> u64 {
        self.runs
            .read()
            .values()
            .filter(|run| {
                run.tenant_id == tenant_id && run.mission_id == mission_id && run.status.is_active()
            })
            .count() as u64
    }

    /// Runs whose parent is `parent_run_id`.
    pub fn children_of(&self, parent_run_id: &str) -> Vec<MissionRun> {
        self.runs
            .read()
            .values()
            .filter(|run| run.parent_run_id.as_deref() == Some(parent_run_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

impl Default for InMemoryRunManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunLifecycleManager for InMemoryRunManager {
    async fn create_run(&self, mission_id: &str) -> Result<String, RepositoryError> {
        let run = MissionRun::new(mission_id, self.tenant_id.clone());
        let id = run.id.clone();
        self.insert(run);
        Ok(id)
    }

    async fn create_child_run(
        &self,
        mission_id: &str,
        parent_run_id: &str,
        depth: u32,
    ) -> Result<String, RepositoryError> {
        let run = MissionRun::child_of(mission_id, self.tenant_id.clone(), parent_run_id, depth);
        let id = run.id.clone();
        self.insert(run);
        Ok(id)
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
    ) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("run {}", run_id)))?;
        run.transition(status);
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<MissionRun, RepositoryError> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("run {}", run_id)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTriggerRuleRepository {
    rules: Arc<RwLock<HashMap<String, TriggerRule>>>,
    executions: Arc<RwLock<Vec<TriggerExecution>>>,
    runs: Option<InMemoryRunManager>,
}

impl InMemoryTriggerRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count active runs from `runs` instead of reporting zero.
    pub fn with_runs(runs: InMemoryRunManager) -> Self {
        Self {
            runs: Some(runs),
            ..Self::default()
        }
    }

    /// Every execution recorded so far, oldest first.
    pub fn executions(&self) -> Vec<TriggerExecution> {
        self.executions.read().clone()
    }
}

#[async_trait]
impl TriggerRuleRepository for InMemoryTriggerRuleRepository {
    async fn list_active(&self, tenant_id: &str) -> Result<Vec<TriggerRule>, RepositoryError> {
        Ok(self
            .rules
            .read()
            .values()
            .filter(|rule| rule.tenant_id == tenant_id && rule.is_active)
            .cloned()
            .collect())
    }

    async fn list_all(&self, tenant_id: &str) -> Result<Vec<TriggerRule>, RepositoryError> {
        let mut rules: Vec<TriggerRule> = self
            .rules
            .read()
            .values()
            .filter(|rule| rule.tenant_id == tenant_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rules)
    }

    async fn find_by_id(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<TriggerRule>, RepositoryError> {
        Ok(self
            .rules
            .read()
            .get(id)
            .filter(|rule| rule.tenant_id == tenant_id)
            .cloned())
    }

    async fn insert(&self, rule: &TriggerRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write();
        if rules.contains_key(&rule.id) {
            return Err(RepositoryError::Database(format!(
                "duplicate trigger rule id {}",
                rule.id
            )));
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn update(&self, rule: &TriggerRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write();
        let stored = rules
            .get_mut(&rule.id)
            .filter(|stored| stored.tenant_id == rule.tenant_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("trigger rule {}", rule.id)))?;

        // last_fired_at and created_at are owned by the store, not the caller
        let last_fired_at = stored.last_fired_at;
        let created_at = stored.created_at;
        *stored = rule.clone();
        stored.last_fired_at = last_fired_at;
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, id: &str) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write();
        match rules.get(id) {
            Some(rule) if rule.tenant_id == tenant_id => {
                rules.remove(id);
                drop(rules);
                self.executions.write().retain(|exec| exec.rule_id != id);
                Ok(())
            }
            _ => Err(RepositoryError::NotFound(format!("trigger rule {}", id))),
        }
    }

    async fn set_active(
        &self,
        tenant_id: &str,
        id: &str,
        active: bool,
    ) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write();
        let rule = rules
            .get_mut(id)
            .filter(|rule| rule.tenant_id == tenant_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("trigger rule {}", id)))?;
        rule.is_active = active;
        rule.updated_at = Utc::now();
        Ok(())
    }

    async fn update_last_fired(
        &self,
        id: &str,
        fired_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(rule) = self.rules.write().get_mut(id) {
            rule.last_fired_at = Some(fired_at);
        }
        Ok(())
    }

    async fn insert_execution(&self, execution: &TriggerExecution) -> Result<(), RepositoryError> {
        self.executions.write().push(execution.clone());
        Ok(())
    }

    async fn list_executions(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<TriggerExecution>, RepositoryError> {
        Ok(self
            .executions
            .read()
            .iter()
            .rev()
            .filter(|exec| exec.rule_id == rule_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn active_run_count(
        &self,
        tenant_id: &str,
        mission_id: &str,
    ) -> Result<u64, RepositoryError> {
        Ok(self
            .runs
            .as_ref()
            .map_or(0, |runs| runs.active_count(tenant_id, mission_id)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMissionEventRepository {
    events: Arc<RwLock<Vec<MissionEvent>>>,
}

impl InMemoryMissionEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl MissionEventRepository for InMemoryMissionEventRepository {
    async fn append(&self, event: &MissionEvent) -> Result<(), RepositoryError> {
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn run_timeline(&self, run_id: &str) -> Result<Vec<MissionEvent>, RepositoryError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|event| event.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<MissionEvent>, RepositoryError> {
        Ok(self.events.read().iter().find(|event| event.id == id).cloned())
    }
}
