// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mission runs.
//!
//! A mission is a reusable definition; a run is one execution of it. Runs are
//! chained through `parent_run_id` and carry a `run_depth` counter that the
//! trigger engine uses for recursion control.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::repository::RepositoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, RepositoryError> {
        match value {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(RepositoryError::Serialization(format!(
                "unknown run status: {other}"
            ))),
        }
    }

    /// Pending and running runs count against a mission's concurrency limit.
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRun {
    pub id: String,
    pub mission_id: String,
    pub tenant_id: String,
    pub status: RunStatus,
    pub run_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MissionRun {
    /// A fresh top-level run in `pending`.
    pub fn new(mission_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mission_id: mission_id.into(),
            tenant_id: tenant_id.into(),
            status: RunStatus::Pending,
            run_depth: 0,
            parent_run_id: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A run spawned by another. An empty parent id yields a parentless run.
    pub fn child_of(
        mission_id: impl Into<String>,
        tenant_id: impl Into<String>,
        parent_run_id: impl Into<String>,
        run_depth: u32,
    ) -> Self {
        let parent_run_id: String = parent_run_id.into();
        Self {
            run_depth,
            parent_run_id: (!parent_run_id.is_empty()).then_some(parent_run_id),
            ..Self::new(mission_id, tenant_id)
        }
    }

    /// Move to `status`, stamping `completed_at` on terminal transitions.
    pub fn transition(&mut self, status: RunStatus) {
        self.status = status;
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Creates and tracks mission runs.
#[async_trait]
pub trait RunLifecycleManager: Send + Sync {
    /// Start a top-level run. Returns the new run id.
    async fn create_run(&self, mission_id: &str) -> Result<String, RepositoryError>;

    /// Start a run spawned by another run at the given depth.
    async fn create_child_run(
        &self,
        mission_id: &str,
        parent_run_id: &str,
        depth: u32,
    ) -> Result<String, RepositoryError>;

    async fn update_run_status(&self, run_id: &str, status: RunStatus)
        -> Result<(), RepositoryError>;

    /// Unknown ids return [`RepositoryError::NotFound`].
    async fn get_run(&self, run_id: &str) -> Result<MissionRun, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(RunStatus::Pending.is_active());
        assert!(RunStatus::Running.is_active());
        assert!(!RunStatus::Completed.is_active());
        assert!(!RunStatus::Failed.is_active());
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        assert_eq!(RunStatus::parse("running").unwrap(), RunStatus::Running);
        assert!(matches!(
            RunStatus::parse("paused"),
            Err(RepositoryError::Serialization(_))
        ));
    }

    #[test]
    fn test_child_run_links_parent() {
        let child = MissionRun::child_of("m-2", "default", "r-1", 3);
        assert_eq!(child.parent_run_id.as_deref(), Some("r-1"));
        assert_eq!(child.run_depth, 3);
        assert_eq!(child.status, RunStatus::Pending);
    }

    #[test]
    fn test_terminal_transition_sets_completed_at() {
        let mut run = MissionRun::new("m-1", "default");
        run.transition(RunStatus::Running);
        assert!(run.completed_at.is_none());
        run.transition(RunStatus::Failed);
        assert!(run.completed_at.is_some());
    }
}
