// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL implementation of `RunLifecycleManager` over `mission_runs`.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::info;

use crate::domain::repository::RepositoryError;
use crate::domain::run::{MissionRun, RunLifecycleManager, RunStatus};

pub struct PostgresRunManager {
    pool: PgPool,
    tenant_id: String,
}

impl PostgresRunManager {
    pub fn new(pool: PgPool, tenant_id: impl Into<String>) -> Self {
        Self {
            pool,
            tenant_id: tenant_id.into(),
        }
    }

    async fn insert(&self, run: &MissionRun) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO mission_runs (id, mission_id, tenant_id, status, run_depth, parent_run_id, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&run.id)
        .bind(&run.mission_id)
        .bind(&run.tenant_id)
        .bind(run.status.as_str())
        .bind(i32::try_from(run.run_depth).unwrap_or(i32::MAX))
        .bind(&run.parent_run_id)
        .bind(run.started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to create run: {}", e)))?;

        info!(
            run_id = %run.id,
            mission_id = %run.mission_id,
            depth = run.run_depth,
            "Mission run created"
        );
        Ok(())
    }

    fn row_to_run(row: &PgRow) -> Result<MissionRun, RepositoryError> {
        let status: String = row.try_get("status")?;
        let depth: i32 = row.try_get("run_depth")?;
        Ok(MissionRun {
            id: row.try_get("id")?,
            mission_id: row.try_get("mission_id")?,
            tenant_id: row.try_get("tenant_id")?,
            status: RunStatus::parse(&status)?,
            run_depth: u32::try_from(depth).unwrap_or(0),
            parent_run_id: row.try_get("parent_run_id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl RunLifecycleManager for PostgresRunManager {
    async fn create_run(&self, mission_id: &str) -> Result<String, RepositoryError> {
        let run = MissionRun::new(mission_id, self.tenant_id.clone());
        self.insert(&run).await?;
        Ok(run.id)
    }

    async fn create_child_run(
        &self,
        mission_id: &str,
        parent_run_id: &str,
        depth: u32,
    ) -> Result<String, RepositoryError> {
        let run = MissionRun::child_of(mission_id, self.tenant_id.clone(), parent_run_id, depth);
        self.insert(&run).await?;
        Ok(run.id)
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE mission_runs
            SET status = $1,
                completed_at = CASE WHEN $2 THEN COALESCE(completed_at, NOW()) ELSE completed_at END
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(status.is_terminal())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<MissionRun, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, mission_id, tenant_id, status, run_depth, parent_run_id, started_at, completed_at
            FROM mission_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("run {}", run_id)))?;

        Self::row_to_run(&row)
    }
}
