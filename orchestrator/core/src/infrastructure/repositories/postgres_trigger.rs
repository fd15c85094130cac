// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Trigger Rule Repository
//!
//! `TriggerRuleRepository` backed by the `trigger_rules` and
//! `trigger_executions` tables. The active run count used by the concurrency
//! guard is read from `mission_runs`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{RepositoryError, TriggerRuleRepository};
use crate::domain::trigger::{ExecutionStatus, TriggerExecution, TriggerMode, TriggerRule};

const RULE_COLUMNS: &str = r#"
    id, tenant_id, name, COALESCE(description, '') AS description, event_pattern,
    condition, target_mission_id, mode, cooldown_seconds, max_depth,
    max_active_runs, is_active, last_fired_at, created_at, updated_at
"#;

pub struct PostgresTriggerRuleRepository {
    pool: PgPool,
}

impl PostgresTriggerRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_rule(row: &PgRow) -> Result<TriggerRule, RepositoryError> {
        let mode: String = row.try_get("mode")?;
        let mode = TriggerMode::parse(&mode).ok_or_else(|| {
            RepositoryError::Serialization(format!("unknown trigger mode: {}", mode))
        })?;

        Ok(TriggerRule {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            event_pattern: row.try_get("event_pattern")?,
            condition: row.try_get("condition")?,
            target_mission_id: row.try_get("target_mission_id")?,
            mode,
            cooldown_seconds: non_negative(row.try_get("cooldown_seconds")?),
            max_depth: non_negative(row.try_get("max_depth")?),
            max_active_runs: non_negative(row.try_get("max_active_runs")?),
            is_active: row.try_get("is_active")?,
            last_fired_at: row.try_get("last_fired_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_execution(row: &PgRow) -> Result<TriggerExecution, RepositoryError> {
        let status: String = row.try_get("status")?;
        let status = ExecutionStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Serialization(format!("unknown execution status: {}", status))
        })?;

        Ok(TriggerExecution {
            id: row.try_get("id")?,
            rule_id: row.try_get("rule_id")?,
            event_id: row.try_get("event_id")?,
            run_id: row.try_get("run_id")?,
            status,
            skip_reason: row.try_get("skip_reason")?,
            executed_at: row.try_get("executed_at")?,
        })
    }

    fn rows_to_rules(rows: &[PgRow]) -> Vec<TriggerRule> {
        rows.iter()
            .filter_map(|row| match Self::row_to_rule(row) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!("Skipping unreadable trigger rule row: {}", e);
                    None
                }
            })
            .collect()
    }
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn as_db_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl TriggerRuleRepository for PostgresTriggerRuleRepository {
    async fn list_active(&self, tenant_id: &str) -> Result<Vec<TriggerRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM trigger_rules WHERE tenant_id = $1 AND is_active = TRUE"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::rows_to_rules(&rows))
    }

    async fn list_all(&self, tenant_id: &str) -> Result<Vec<TriggerRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM trigger_rules WHERE tenant_id = $1 ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::rows_to_rules(&rows))
    }

    async fn find_by_id(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<TriggerRule>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM trigger_rules WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_rule).transpose()
    }

    async fn insert(&self, rule: &TriggerRule) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO trigger_rules (
                id, tenant_id, name, description, event_pattern, condition,
                target_mission_id, mode, cooldown_seconds, max_depth,
                max_active_runs, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, NULLIF($4, ''), $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.tenant_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.event_pattern)
        .bind(&rule.condition)
        .bind(&rule.target_mission_id)
        .bind(rule.mode.as_str())
        .bind(as_db_int(rule.cooldown_seconds))
        .bind(as_db_int(rule.max_depth))
        .bind(as_db_int(rule.max_active_runs))
        .bind(rule.is_active)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to insert trigger rule: {}", e)))?;

        Ok(())
    }

    async fn update(&self, rule: &TriggerRule) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE trigger_rules
            SET name = $1, description = NULLIF($2, ''), event_pattern = $3, condition = $4,
                target_mission_id = $5, mode = $6, cooldown_seconds = $7, max_depth = $8,
                max_active_runs = $9, is_active = $10, updated_at = NOW()
            WHERE id = $11 AND tenant_id = $12
            "#,
        )
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.event_pattern)
        .bind(&rule.condition)
        .bind(&rule.target_mission_id)
        .bind(rule.mode.as_str())
        .bind(as_db_int(rule.cooldown_seconds))
        .bind(as_db_int(rule.max_depth))
        .bind(as_db_int(rule.max_active_runs))
        .bind(rule.is_active)
        .bind(&rule.id)
        .bind(&rule.tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("trigger rule {}", rule.id)));
        }
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM trigger_rules WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("trigger rule {}", id)));
        }
        Ok(())
    }

    async fn set_active(
        &self,
        tenant_id: &str,
        id: &str,
        active: bool,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE trigger_rules SET is_active = $1, updated_at = NOW() WHERE id = $2 AND tenant_id = $3",
        )
        .bind(active)
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("trigger rule {}", id)));
        }
        Ok(())
    }

    async fn update_last_fired(
        &self,
        id: &str,
        fired_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE trigger_rules SET last_fired_at = $1 WHERE id = $2")
            .bind(fired_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_execution(&self, execution: &TriggerExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO trigger_executions (id, rule_id, event_id, run_id, status, skip_reason, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.rule_id)
        .bind(&execution.event_id)
        .bind(&execution.run_id)
        .bind(execution.status.as_str())
        .bind(&execution.skip_reason)
        .bind(execution.executed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryError::Database(format!("Failed to insert trigger execution: {}", e))
        })?;

        Ok(())
    }

    async fn list_executions(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<TriggerExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, rule_id, event_id, run_id, status, skip_reason, executed_at
            FROM trigger_executions
            WHERE rule_id = $1
            ORDER BY executed_at DESC
            LIMIT $2
            "#,
        )
        .bind(rule_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn active_run_count(
        &self,
        tenant_id: &str,
        mission_id: &str,
    ) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM mission_runs
            WHERE tenant_id = $1 AND mission_id = $2 AND status IN ('pending', 'running')
            "#,
        )
        .bind(tenant_id)
        .bind(mission_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
