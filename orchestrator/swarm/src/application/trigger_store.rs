// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Trigger Rule Store
//!
//! Durable CRUD for trigger rules and their execution audit trail, fronted by
//! an in-memory cache of active rules for the evaluation hot path.
//!
//! The repository is authoritative; the cache holds a rule iff it is active.
//! Every mutation updates the cache synchronously after the repository write
//! succeeds. The cache is a copy-on-write snapshot: readers clone an `Arc` of
//! the map and never hold the lock while evaluating, and full reloads take the
//! write lock only for the swap.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use swarm_control_core::domain::repository::{RepositoryError, TriggerRuleRepository};
use swarm_control_core::domain::trigger::{
    NewTriggerRule, TriggerExecution, TriggerRule, TriggerValidationError, DEFAULT_TENANT_ID,
};

pub const DEFAULT_EXECUTION_HISTORY_LIMIT: usize = 20;

type RuleCache = Arc<HashMap<String, Arc<TriggerRule>>>;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("trigger store: database not available")]
    StorageUnavailable,

    #[error("trigger store: {0}")]
    Validation(#[from] TriggerValidationError),

    #[error("trigger store: rule not found: {0}")]
    NotFound(String),

    #[error("trigger store: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for TriggerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => TriggerError::NotFound(what),
            other => TriggerError::Repository(other),
        }
    }
}

pub struct TriggerStore {
    repository: Option<Arc<dyn TriggerRuleRepository>>,
    tenant_id: String,
    execution_history_limit: usize,
    cache: RwLock<RuleCache>,
}

impl TriggerStore {
    /// `None` means no database: CRUD fails with `StorageUnavailable` and
    /// nothing ever matches.
    pub fn new(repository: Option<Arc<dyn TriggerRuleRepository>>) -> Self {
        Self::for_tenant(repository, DEFAULT_TENANT_ID)
    }

    pub fn for_tenant(
        repository: Option<Arc<dyn TriggerRuleRepository>>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            tenant_id: tenant_id.into(),
            execution_history_limit: DEFAULT_EXECUTION_HISTORY_LIMIT,
            cache: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn with_execution_history_limit(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.execution_history_limit = limit;
        }
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn has_storage(&self) -> bool {
        self.repository.is_some()
    }

    fn repository(&self) -> Result<&Arc<dyn TriggerRuleRepository>, TriggerError> {
        self.repository.as_ref().ok_or(TriggerError::StorageUnavailable)
    }

    fn snapshot(&self) -> RuleCache {
        Arc::clone(&self.cache.read())
    }

    fn cache_put(&self, rule: TriggerRule) {
        let mut cache = self.cache.write();
        Arc::make_mut(&mut cache).insert(rule.id.clone(), Arc::new(rule));
    }

    fn cache_evict(&self, id: &str) {
        let mut cache = self.cache.write();
        if cache.contains_key(id) {
            Arc::make_mut(&mut cache).remove(id);
        }
    }

    /// Replace the whole cache with the tenant's active rules. Safe to call
    /// repeatedly.
    pub async fn load_active_rules(&self) -> Result<usize, TriggerError> {
        let rules = self.repository()?.list_active(&self.tenant_id).await?;

        let fresh: HashMap<String, Arc<TriggerRule>> = rules
            .into_iter()
            .filter(|rule| rule.is_active)
            .map(|rule| (rule.id.clone(), Arc::new(rule)))
            .collect();
        let count = fresh.len();

        *self.cache.write() = Arc::new(fresh);

        info!(count, tenant_id = %self.tenant_id, "Loaded active trigger rules into cache");
        Ok(count)
    }

    /// Active rules reacting to `event_type`, by exact match.
    pub fn matching_rules(&self, event_type: &str) -> Vec<Arc<TriggerRule>> {
        self.snapshot()
            .values()
            .filter(|rule| rule.matches(event_type))
            .cloned()
            .collect()
    }

    /// Current cached copy of a rule, if active.
    pub fn cached_rule(&self, id: &str) -> Option<Arc<TriggerRule>> {
        self.snapshot().get(id).cloned()
    }

    pub fn cached_rule_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Every rule for the tenant, newest first.
    pub async fn list_all(&self) -> Result<Vec<TriggerRule>, TriggerError> {
        Ok(self.repository()?.list_all(&self.tenant_id).await?)
    }

    pub async fn get(&self, id: &str) -> Result<TriggerRule, TriggerError> {
        self.repository()?
            .find_by_id(&self.tenant_id, id)
            .await?
            .ok_or_else(|| TriggerError::NotFound(id.to_string()))
    }

    pub async fn create(&self, input: NewTriggerRule) -> Result<TriggerRule, TriggerError> {
        let repository = self.repository()?;
        let rule = input.into_rule(&self.tenant_id);
        rule.validate()?;

        repository.insert(&rule).await?;
        if rule.is_active {
            self.cache_put(rule.clone());
        }

        info!(
            rule_id = %rule.id,
            event_pattern = %rule.event_pattern,
            target_mission_id = %rule.target_mission_id,
            mode = %rule.mode,
            "Trigger rule created"
        );
        Ok(rule)
    }

    /// Overwrite a rule's definition. `last_fired_at` is carried over from
    /// the cached copy so an edit does not reset the cooldown.
    pub async fn update(&self, mut rule: TriggerRule) -> Result<TriggerRule, TriggerError> {
        let repository = self.repository()?;
        rule.tenant_id = self.tenant_id.clone();
        rule.apply_defaults();
        rule.validate()?;

        repository.update(&rule).await?;
        rule.updated_at = Utc::now();

        if rule.is_active {
            if let Some(cached) = self.cached_rule(&rule.id) {
                rule.last_fired_at = rule.last_fired_at.max(cached.last_fired_at);
            }
            self.cache_put(rule.clone());
        } else {
            self.cache_evict(&rule.id);
        }

        info!(rule_id = %rule.id, is_active = rule.is_active, "Trigger rule updated");
        Ok(rule)
    }

    pub async fn delete(&self, id: &str) -> Result<(), TriggerError> {
        self.repository()?.delete(&self.tenant_id, id).await?;
        self.cache_evict(id);
        info!(rule_id = %id, "Trigger rule deleted");
        Ok(())
    }

    /// Toggle a rule. Activation re-reads the rule after the write so the
    /// cache holds exactly what the repository stored.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<(), TriggerError> {
        let repository = self.repository()?;
        repository.set_active(&self.tenant_id, id, active).await?;

        if active {
            match repository.find_by_id(&self.tenant_id, id).await {
                Ok(Some(rule)) if rule.is_active => self.cache_put(rule),
                Ok(_) => {
                    warn!(rule_id = %id, "Rule vanished or deactivated after activation; cache not updated")
                }
                Err(e) => {
                    warn!(rule_id = %id, "Failed to re-read activated rule; cache not updated: {}", e)
                }
            }
        } else {
            self.cache_evict(id);
        }

        info!(rule_id = %id, active, "Trigger rule toggled");
        Ok(())
    }

    /// Best-effort: a repository failure is logged and the cache is still
    /// updated so the cooldown holds for this process.
    pub async fn update_last_fired(&self, id: &str, fired_at: DateTime<Utc>) {
        let Some(repository) = &self.repository else {
            return;
        };

        if let Err(e) = repository.update_last_fired(id, fired_at).await {
            warn!(rule_id = %id, "Failed to persist last_fired_at: {}", e);
        }

        let mut cache = self.cache.write();
        if cache.contains_key(id) {
            if let Some(rule) = Arc::make_mut(&mut cache).get_mut(id) {
                Arc::make_mut(rule).last_fired_at = Some(fired_at);
            }
        }
    }

    /// Append an audit record. Never touches the cache.
    pub async fn log_execution(&self, execution: &TriggerExecution) -> Result<(), TriggerError> {
        self.repository()?.insert_execution(execution).await?;
        Ok(())
    }

    /// Recent executions for a rule, newest first. `None` uses the configured
    /// history limit.
    pub async fn list_executions(
        &self,
        rule_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TriggerExecution>, TriggerError> {
        let limit = limit
            .filter(|limit| *limit > 0)
            .unwrap_or(self.execution_history_limit);
        Ok(self.repository()?.list_executions(rule_id, limit).await?)
    }

    /// Pending or running runs of `mission_id` in this store's tenant.
    pub async fn active_count(&self, mission_id: &str) -> Result<u64, TriggerError> {
        Ok(self
            .repository()?
            .active_run_count(&self.tenant_id, mission_id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_control_core::domain::trigger::{ExecutionStatus, TriggerMode};
    use swarm_control_core::infrastructure::repositories::InMemoryTriggerRuleRepository;

    fn store() -> (TriggerStore, InMemoryTriggerRuleRepository) {
        let repo = InMemoryTriggerRuleRepository::new();
        (TriggerStore::new(Some(Arc::new(repo.clone()))), repo)
    }

    fn chain_rule() -> NewTriggerRule {
        NewTriggerRule::new("chain", "mission.completed", "m-next")
    }

    #[tokio::test]
    async fn test_store_without_database() {
        let store = TriggerStore::new(None);
        assert!(matches!(
            store.load_active_rules().await,
            Err(TriggerError::StorageUnavailable)
        ));
        assert!(matches!(
            store.create(chain_rule()).await,
            Err(TriggerError::StorageUnavailable)
        ));
        assert!(matches!(store.list_all().await, Err(TriggerError::StorageUnavailable)));
        assert!(matches!(store.get("x").await, Err(TriggerError::StorageUnavailable)));
        assert!(matches!(store.delete("x").await, Err(TriggerError::StorageUnavailable)));
        assert!(matches!(
            store.set_active("x", true).await,
            Err(TriggerError::StorageUnavailable)
        ));
        assert!(matches!(
            store.list_executions("x", None).await,
            Err(TriggerError::StorageUnavailable)
        ));
        assert!(matches!(
            store.log_execution(&TriggerExecution::proposed("x", "e")).await,
            Err(TriggerError::StorageUnavailable)
        ));
        assert!(store.matching_rules("mission.completed").is_empty());
        store.update_last_fired("x", Utc::now()).await;
    }

    #[tokio::test]
    async fn test_create_applies_defaults_and_caches_active_rules() {
        let (store, _) = store();
        let rule = store.create(chain_rule()).await.unwrap();
        assert_eq!(rule.mode, TriggerMode::Propose);
        assert_eq!(rule.cooldown_seconds, 60);
        assert_eq!(store.matching_rules("mission.completed").len(), 1);

        let mut inactive = chain_rule();
        inactive.is_active = false;
        store.create(inactive).await.unwrap();
        assert_eq!(store.matching_rules("mission.completed").len(), 1);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let (store, _) = store();
        let result = store
            .create(NewTriggerRule::new("chain", "", "m-next"))
            .await;
        assert!(matches!(
            result,
            Err(TriggerError::Validation(TriggerValidationError::MissingEventPattern))
        ));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_rules_match_same_event() {
        let (store, _) = store();
        store.create(chain_rule()).await.unwrap();
        store
            .create(NewTriggerRule::new("notify", "mission.completed", "m-notify"))
            .await
            .unwrap();
        store
            .create(NewTriggerRule::new("other", "mission.failed", "m-retry"))
            .await
            .unwrap();

        assert_eq!(store.matching_rules("mission.completed").len(), 2);
        assert_eq!(store.matching_rules("mission.failed").len(), 1);
        assert!(store.matching_rules("mission.*").is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_and_reactivate_toggle_matching() {
        let (store, _) = store();
        let rule = store.create(chain_rule()).await.unwrap();

        store.set_active(&rule.id, false).await.unwrap();
        assert!(store.matching_rules("mission.completed").is_empty());

        store.set_active(&rule.id, true).await.unwrap();
        assert_eq!(store.matching_rules("mission.completed").len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_distinct() {
        let (store, _) = store();
        assert!(matches!(store.get("missing").await, Err(TriggerError::NotFound(_))));
        assert!(matches!(store.delete("missing").await, Err(TriggerError::NotFound(_))));
        assert!(matches!(
            store.set_active("missing", true).await,
            Err(TriggerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_evicts_from_cache() {
        let (store, _) = store();
        let rule = store.create(chain_rule()).await.unwrap();
        store.delete(&rule.id).await.unwrap();
        assert!(store.cached_rule(&rule.id).is_none());
        assert!(matches!(store.get(&rule.id).await, Err(TriggerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_refreshes_cache_and_keeps_last_fired() {
        let (store, _) = store();
        let rule = store.create(chain_rule()).await.unwrap();
        let fired_at = Utc::now();
        store.update_last_fired(&rule.id, fired_at).await;

        let mut edited = rule.clone();
        edited.event_pattern = "mission.failed".to_string();
        store.update(edited).await.unwrap();

        assert!(store.matching_rules("mission.completed").is_empty());
        let cached = store.cached_rule(&rule.id).unwrap();
        assert_eq!(cached.event_pattern, "mission.failed");
        assert_eq!(cached.last_fired_at, Some(fired_at));

        let mut deactivated = (*cached).clone();
        deactivated.is_active = false;
        store.update(deactivated).await.unwrap();
        assert!(store.cached_rule(&rule.id).is_none());
    }

    #[tokio::test]
    async fn test_reader_snapshot_is_unaffected_by_last_fired_update() {
        let (store, _) = store();
        let rule = store.create(chain_rule()).await.unwrap();

        let held = store.matching_rules("mission.completed");
        store.update_last_fired(&rule.id, Utc::now()).await;

        assert!(held[0].last_fired_at.is_none());
        assert!(store.cached_rule(&rule.id).unwrap().last_fired_at.is_some());
    }

    #[tokio::test]
    async fn test_load_active_rules_replaces_cache() {
        let (store, repo) = store();
        let rule = store.create(chain_rule()).await.unwrap();

        // Changed behind the store's back, e.g. by another replica
        repo.set_active(DEFAULT_TENANT_ID, &rule.id, false).await.unwrap();
        assert_eq!(store.cached_rule_count(), 1);

        assert_eq!(store.load_active_rules().await.unwrap(), 0);
        assert!(store.matching_rules("mission.completed").is_empty());
    }

    #[tokio::test]
    async fn test_execution_history_uses_default_limit() {
        let (store, _) = store();
        let store = store.with_execution_history_limit(3);
        for i in 0..5 {
            store
                .log_execution(&TriggerExecution::proposed("r-1", &format!("ev-{i}")))
                .await
                .unwrap();
        }
        let recent = store.list_executions("r-1", None).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].event_id, "ev-4");
        assert_eq!(recent[0].status, ExecutionStatus::Proposed);
        assert_eq!(store.list_executions("r-1", Some(10)).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_active_count_is_scoped_to_the_store_tenant() {
        use swarm_control_core::domain::run::MissionRun;
        use swarm_control_core::infrastructure::repositories::InMemoryRunManager;

        let runs = InMemoryRunManager::new();
        runs.insert(MissionRun::new("m-next", "tenant-a"));
        runs.insert(MissionRun::new("m-next", "tenant-b"));
        runs.insert(MissionRun::new("m-next", "tenant-b"));
        let repo = InMemoryTriggerRuleRepository::with_runs(runs);

        let store = TriggerStore::for_tenant(Some(Arc::new(repo)), "tenant-a");
        assert_eq!(store.active_count("m-next").await.unwrap(), 1);
    }
}
