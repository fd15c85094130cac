// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of MissionEventRepository
//!
//! Append-only audit trail in `mission_events`. Rows are never updated.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;

use crate::domain::events::{EventSeverity, MissionEvent, MissionEventType};
use crate::domain::repository::{MissionEventRepository, RepositoryError};

pub struct PostgresMissionEventRepository {
    pool: PgPool,
}

impl PostgresMissionEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn deserialize_row(row: &PgRow) -> Result<MissionEvent, RepositoryError> {
        let event_type: String = row.try_get("event_type")?;
        let severity: String = row.try_get("severity")?;

        Ok(MissionEvent {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            tenant_id: row.try_get("tenant_id")?,
            event_type: MissionEventType::from(event_type),
            // Unknown severities were written by a newer producer; read them as info
            severity: EventSeverity::parse(&severity).unwrap_or(EventSeverity::Info),
            source_agent: row.try_get("source_agent")?,
            source_team: row.try_get("source_team")?,
            payload: row.try_get("payload")?,
            emitted_at: row.try_get("emitted_at")?,
        })
    }
}

#[async_trait]
impl MissionEventRepository for PostgresMissionEventRepository {
    async fn append(&self, event: &MissionEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO mission_events (
                id, run_id, tenant_id, event_type, severity,
                source_agent, source_team, payload, emitted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&event.id)
        .bind(&event.run_id)
        .bind(&event.tenant_id)
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(&event.source_agent)
        .bind(&event.source_team)
        .bind(&event.payload)
        .bind(event.emitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to append mission event: {}", e)))?;

        debug!(event_id = %event.id, run_id = %event.run_id, "Mission event persisted");
        Ok(())
    }

    async fn run_timeline(&self, run_id: &str) -> Result<Vec<MissionEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, tenant_id, event_type, severity,
                   source_agent, source_team, payload, emitted_at
            FROM mission_events
            WHERE run_id = $1
            ORDER BY emitted_at ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::deserialize_row).collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<MissionEvent>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, run_id, tenant_id, event_type, severity,
                   source_agent, source_team, payload, emitted_at
            FROM mission_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::deserialize_row).transpose()
    }
}
