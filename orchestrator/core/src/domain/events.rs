// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mission event audit trail.
//!
//! A [`MissionEvent`] is the persisted record of something that happened in a
//! run. A [`MissionEventSummary`] is the small signal re-published on
//! `swarm.mission.events.{run_id}` that points back at it. The trigger engine
//! only ever sees summaries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::repository::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MissionEventType {
    MissionStarted,
    MissionCompleted,
    MissionFailed,
    MissionCancelled,
    TeamSpawned,
    TeamStopped,
    AgentStarted,
    AgentStopped,
    ToolInvoked,
    ToolCompleted,
    ToolFailed,
    ArtifactCreated,
    MemoryStored,
    MemoryRecalled,
    TriggerFired,
    TriggerSkipped,
    SchedulerTick,
    Other(String),
}

impl MissionEventType {
    pub fn as_str(&self) -> &str {
        match self {
            MissionEventType::MissionStarted => "mission.started",
            MissionEventType::MissionCompleted => "mission.completed",
            MissionEventType::MissionFailed => "mission.failed",
            MissionEventType::MissionCancelled => "mission.cancelled",
            MissionEventType::TeamSpawned => "team.spawned",
            MissionEventType::TeamStopped => "team.stopped",
            MissionEventType::AgentStarted => "agent.started",
            MissionEventType::AgentStopped => "agent.stopped",
            MissionEventType::ToolInvoked => "tool.invoked",
            MissionEventType::ToolCompleted => "tool.completed",
            MissionEventType::ToolFailed => "tool.failed",
            MissionEventType::ArtifactCreated => "artifact.created",
            MissionEventType::MemoryStored => "memory.stored",
            MissionEventType::MemoryRecalled => "memory.recalled",
            MissionEventType::TriggerFired => "trigger.fired",
            MissionEventType::TriggerSkipped => "trigger.skipped",
            MissionEventType::SchedulerTick => "scheduler.tick",
            MissionEventType::Other(other) => other,
        }
    }

    /// Events the trigger engine emits about itself. Reacting to these would
    /// let a rule trigger on its own output.
    pub fn is_trigger_lifecycle(&self) -> bool {
        matches!(
            self,
            MissionEventType::TriggerFired | MissionEventType::TriggerSkipped
        )
    }
}

/// An absent event type decodes as the empty string, which no rule matches.
impl Default for MissionEventType {
    fn default() -> Self {
        MissionEventType::Other(String::new())
    }
}

impl From<String> for MissionEventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "mission.started" => MissionEventType::MissionStarted,
            "mission.completed" => MissionEventType::MissionCompleted,
            "mission.failed" => MissionEventType::MissionFailed,
            "mission.cancelled" => MissionEventType::MissionCancelled,
            "team.spawned" => MissionEventType::TeamSpawned,
            "team.stopped" => MissionEventType::TeamStopped,
            "agent.started" => MissionEventType::AgentStarted,
            "agent.stopped" => MissionEventType::AgentStopped,
            "tool.invoked" => MissionEventType::ToolInvoked,
            "tool.completed" => MissionEventType::ToolCompleted,
            "tool.failed" => MissionEventType::ToolFailed,
            "artifact.created" => MissionEventType::ArtifactCreated,
            "memory.stored" => MissionEventType::MemoryStored,
            "memory.recalled" => MissionEventType::MemoryRecalled,
            "trigger.fired" => MissionEventType::TriggerFired,
            "trigger.skipped" => MissionEventType::TriggerSkipped,
            "scheduler.tick" => MissionEventType::SchedulerTick,
            _ => MissionEventType::Other(value),
        }
    }
}

impl From<&str> for MissionEventType {
    fn from(value: &str) -> Self {
        MissionEventType::from(value.to_string())
    }
}

impl From<MissionEventType> for String {
    fn from(value: MissionEventType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for MissionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

impl EventSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSeverity::Debug => "debug",
            EventSeverity::Info => "info",
            EventSeverity::Warn => "warn",
            EventSeverity::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debug" => Some(EventSeverity::Debug),
            "info" => Some(EventSeverity::Info),
            "warn" => Some(EventSeverity::Warn),
            "error" => Some(EventSeverity::Error),
            _ => None,
        }
    }
}

/// Persistent audit record for one thing that happened in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionEvent {
    pub id: String,
    pub run_id: String,
    pub tenant_id: String,
    pub event_type: MissionEventType,
    pub severity: EventSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_team: Option<String>,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

/// The signal published on the bus after a [`MissionEvent`] is persisted.
/// Consumers fetch full detail by `mission_event_id` when they need it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionEventSummary {
    #[serde(default)]
    pub mission_event_id: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub event_type: MissionEventType,
    #[serde(default)]
    pub source_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_summary: Option<serde_json::Value>,
}

impl MissionEventSummary {
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Summaries carry payload key names only, never values.
    pub fn summarize_payload(payload: &serde_json::Value) -> Option<serde_json::Value> {
        let object = payload.as_object().filter(|o| !o.is_empty())?;
        let mut keys: Vec<&String> = object.keys().collect();
        keys.sort();
        Some(serde_json::json!({ "keys": keys }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventAuditError {
    #[error("event store is not available")]
    StorageUnavailable,

    #[error("run_id is required")]
    MissingRunId,

    #[error("run_id {0:?} is not a valid bus subject token")]
    InvalidRunId(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Records mission events. Implementations persist first and publish second,
/// so a bus outage never loses an audit record.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        run_id: &str,
        event_type: MissionEventType,
        severity: EventSeverity,
        source_agent: &str,
        source_team: &str,
        payload: serde_json::Value,
    ) -> Result<String, EventAuditError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trips_through_strings() {
        assert_eq!(
            MissionEventType::from("mission.completed"),
            MissionEventType::MissionCompleted
        );
        assert_eq!(MissionEventType::TriggerFired.as_str(), "trigger.fired");
        let custom = MissionEventType::from("billing.closed");
        assert_eq!(custom, MissionEventType::Other("billing.closed".to_string()));
        assert_eq!(custom.as_str(), "billing.closed");
    }

    #[test]
    fn test_partial_summary_decodes_with_defaults() {
        let summary =
            MissionEventSummary::decode(br#"{"run_id":"run-1","event_type":"mission.completed"}"#)
                .unwrap();
        assert_eq!(summary.mission_event_id, "");
        assert_eq!(summary.event_type, MissionEventType::MissionCompleted);

        let bare = MissionEventSummary::decode(b"{}").unwrap();
        assert_eq!(bare.event_type.as_str(), "");
        assert_eq!(bare.run_id, "");
    }

    #[test]
    fn test_trigger_lifecycle_detection() {
        assert!(MissionEventType::TriggerFired.is_trigger_lifecycle());
        assert!(MissionEventType::TriggerSkipped.is_trigger_lifecycle());
        assert!(!MissionEventType::MissionCompleted.is_trigger_lifecycle());
    }

    #[test]
    fn test_summary_decodes_with_missing_optional_fields() {
        let summary = MissionEventSummary::decode(
            br#"{"mission_event_id":"ev-1","event_type":"mission.completed"}"#,
        )
        .unwrap();
        assert_eq!(summary.event_type, MissionEventType::MissionCompleted);
        assert!(summary.run_id.is_empty());
        assert!(summary.source_agent.is_empty());
    }

    #[test]
    fn test_payload_summary_lists_sorted_keys() {
        let summary =
            MissionEventSummary::summarize_payload(&json!({"zeta": 1, "alpha": {"x": 2}})).unwrap();
        assert_eq!(summary, json!({"keys": ["alpha", "zeta"]}));
        assert!(MissionEventSummary::summarize_payload(&json!({})).is_none());
        assert!(MissionEventSummary::summarize_payload(&json!("scalar")).is_none());
    }
}
