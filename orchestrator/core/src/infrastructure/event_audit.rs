// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persistent mission event emitter.
//!
//! Every event is written to the [`MissionEventRepository`] before anything is
//! published. The bus signal that follows is a [`MissionEventSummary`] on
//! `swarm.mission.events.{run_id}` carrying the new event id and the payload's
//! key names. With no bus the emitter runs degraded: events persist, nothing
//! is announced.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::events::{
    EventAuditError, EventEmitter, EventSeverity, MissionEvent, MissionEventSummary,
    MissionEventType,
};
use crate::domain::repository::MissionEventRepository;
use crate::domain::topics::{is_subject_token, mission_events_topic};
use crate::infrastructure::message_bus::MessageBus;

pub struct AuditEventEmitter {
    repository: Option<Arc<dyn MissionEventRepository>>,
    bus: Option<MessageBus>,
    tenant_id: String,
}

impl AuditEventEmitter {
    pub fn new(
        repository: Option<Arc<dyn MissionEventRepository>>,
        bus: Option<MessageBus>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            bus,
            tenant_id: tenant_id.into(),
        }
    }

    pub async fn run_timeline(&self, run_id: &str) -> Result<Vec<MissionEvent>, EventAuditError> {
        let repository = self
            .repository
            .as_ref()
            .ok_or(EventAuditError::StorageUnavailable)?;
        Ok(repository.run_timeline(run_id).await?)
    }

    fn announce(&self, event: &MissionEvent) {
        let Some(bus) = &self.bus else {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Bus offline: mission event persisted only"
            );
            return;
        };

        let summary = MissionEventSummary {
            mission_event_id: event.id.clone(),
            run_id: event.run_id.clone(),
            event_type: event.event_type.clone(),
            source_agent: event.source_agent.clone().unwrap_or_default(),
            payload_summary: MissionEventSummary::summarize_payload(&event.payload),
        };

        let bytes = match serde_json::to_vec(&summary) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(event_id = %event.id, "Failed to encode mission event summary: {}", e);
                return;
            }
        };

        if let Err(e) = bus.publish(&mission_events_topic(&event.run_id), bytes) {
            warn!(event_id = %event.id, "Failed to publish mission event summary: {}", e);
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[async_trait]
impl EventEmitter for AuditEventEmitter {
    async fn emit(
        &self,
        run_id: &str,
        event_type: MissionEventType,
        severity: EventSeverity,
        source_agent: &str,
        source_team: &str,
        payload: serde_json::Value,
    ) -> Result<String, EventAuditError> {
        let repository = self
            .repository
            .as_ref()
            .ok_or(EventAuditError::StorageUnavailable)?;
        if run_id.is_empty() {
            return Err(EventAuditError::MissingRunId);
        }
        if !is_subject_token(run_id) {
            return Err(EventAuditError::InvalidRunId(run_id.to_string()));
        }

        let event = MissionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            tenant_id: self.tenant_id.clone(),
            event_type,
            severity,
            source_agent: non_empty(source_agent),
            source_team: non_empty(source_team),
            payload,
            emitted_at: Utc::now(),
        };

        repository.append(&event).await?;
        self.announce(&event);

        Ok(event.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryMissionEventRepository;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_requires_storage_and_run_id() {
        let emitter = AuditEventEmitter::new(None, None, "default");
        let result = emitter
            .emit("r1", MissionEventType::MissionStarted, EventSeverity::Info, "", "", json!({}))
            .await;
        assert!(matches!(result, Err(EventAuditError::StorageUnavailable)));

        let emitter = AuditEventEmitter::new(
            Some(Arc::new(InMemoryMissionEventRepository::new())),
            None,
            "default",
        );
        let result = emitter
            .emit("", MissionEventType::MissionStarted, EventSeverity::Info, "", "", json!({}))
            .await;
        assert!(matches!(result, Err(EventAuditError::MissingRunId)));
    }

    #[tokio::test]
    async fn test_emit_rejects_run_ids_that_break_the_subject() {
        let repo = InMemoryMissionEventRepository::new();
        let emitter = AuditEventEmitter::new(
            Some(Arc::new(repo.clone())),
            Some(MessageBus::new(16)),
            "default",
        );

        for run_id in ["run.1", "run-*", ">"] {
            let result = emitter
                .emit(run_id, MissionEventType::MissionStarted, EventSeverity::Info, "", "", json!({}))
                .await;
            assert!(matches!(result, Err(EventAuditError::InvalidRunId(ref id)) if id == run_id));
        }
        assert!(emitter.run_timeline("run.1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_without_bus_still_persists() {
        let repo = InMemoryMissionEventRepository::new();
        let emitter = AuditEventEmitter::new(Some(Arc::new(repo.clone())), None, "default");

        let id = emitter
            .emit(
                "r1",
                MissionEventType::ToolInvoked,
                EventSeverity::Debug,
                "agent-7",
                "",
                json!({"tool": "search"}),
            )
            .await
            .unwrap();

        let timeline = emitter.run_timeline("r1").await.unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].id, id);
        assert_eq!(timeline[0].source_agent.as_deref(), Some("agent-7"));
        assert!(timeline[0].source_team.is_none());
    }
}
