// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is
//! injected into every PostgreSQL repository implementation. Only constructed
//! when `spec.database` is present in `swarm-config.yaml`.

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::domain::repository::PostgresConfig;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::connect(&PostgresConfig {
            connection_string: connection_string.to_string(),
            max_connections: 5,
        })
        .await
    }

    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string)
            .await?;

        Ok(Self { pool })
    }

    /// Apply the reference schema shipped in `migrations/`. Statements are
    /// idempotent (`IF NOT EXISTS`).
    pub async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/0001_control_plane.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
