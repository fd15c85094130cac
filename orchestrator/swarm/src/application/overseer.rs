// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Overseer - Zero-Trust Reconciliation Engine
//!
//! Issues task commands on `swarm.mission.task` and blocks the issuer until a
//! telemetry envelope on `swarm.team.*.telemetry` proves the desired state was
//! reached, or the deadline passes.
//!
//! Telemetry first passes the governance valve: an envelope with an explicit
//! trust score below the auto-execute threshold is handed to the governance
//! callback for human review and never advances a task. Unscored envelopes
//! (trust score 0) bypass the valve.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use swarm_control_core::domain::config::OverseerConfig;
use swarm_control_core::domain::envelope::Envelope;
use swarm_control_core::domain::topics::{TOPIC_MISSION_TASK, TOPIC_TEAM_TELEMETRY_WILDCARD};
use swarm_control_core::infrastructure::message_bus::{spawn_dispatch, BusError, MessageBus};

use crate::domain::task::{StateReport, TaskState, TelemetryOutcome};

/// Receives envelopes halted by the governance valve.
pub type GovernanceCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum OverseerError {
    #[error("message bus is not connected")]
    TransportUnavailable,

    #[error("task {0} is already awaiting reconciliation")]
    TaskAlreadyPending(String),

    #[error("task {task_id} timed out waiting for state {desired_state:?}")]
    TimedOut {
        task_id: String,
        desired_state: String,
    },

    #[error("overseer is shutting down")]
    Shutdown,

    #[error("failed to encode task command: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to publish task command: {0}")]
    Publish(#[from] BusError),
}

pub struct Overseer {
    bus: Option<MessageBus>,
    source_node: String,
    default_task_timeout: Duration,
    tasks: Arc<RwLock<HashMap<String, Arc<TaskState>>>>,
    // Separate from the task map so config reads never queue behind bookkeeping
    auto_execute_threshold: RwLock<f64>,
    governance_callback: RwLock<Option<GovernanceCallback>>,
    cancel: CancellationToken,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Overseer {
    pub fn new(bus: Option<MessageBus>, config: &OverseerConfig) -> Self {
        Self {
            bus,
            source_node: config.source_node.clone(),
            default_task_timeout: config.default_task_timeout(),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            auto_execute_threshold: RwLock::new(config.auto_execute_threshold.clamp(0.0, 1.0)),
            governance_callback: RwLock::new(None),
            cancel: CancellationToken::new(),
            pumps: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to task commands and telemetry. Without a bus the Overseer
    /// stays degraded and `issue_task` fails fast.
    pub fn start(self: &Arc<Self>) -> Result<(), OverseerError> {
        let Some(bus) = &self.bus else {
            warn!("Overseer started without a message bus; running degraded");
            return Ok(());
        };

        let commands = bus.subscribe(TOPIC_MISSION_TASK)?;
        let telemetry = bus.subscribe(TOPIC_TEAM_TELEMETRY_WILDCARD)?;

        let command_pump = spawn_dispatch(commands, self.cancel.child_token(), |message| async move {
            debug!(
                subject = %message.subject,
                bytes = message.payload.len(),
                "Task command observed"
            );
        });

        let overseer = Arc::clone(self);
        let telemetry_pump = spawn_dispatch(telemetry, self.cancel.child_token(), move |message| {
            let overseer = Arc::clone(&overseer);
            async move {
                overseer.handle_telemetry(&message.payload);
            }
        });

        self.pumps.lock().extend([command_pump, telemetry_pump]);
        info!("Overseer online; zero-trust reconciliation loop active");
        Ok(())
    }

    /// Stop the subscription pumps and release every blocked issuer.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
    }

    pub fn set_governance_callback(&self, callback: GovernanceCallback) {
        *self.governance_callback.write() = Some(callback);
    }

    /// Values outside `[0, 1]` are clamped.
    pub fn set_auto_execute_threshold(&self, threshold: f64) {
        let clamped = threshold.clamp(0.0, 1.0);
        *self.auto_execute_threshold.write() = clamped;
        info!(threshold = clamped, "Auto-execute threshold updated");
    }

    pub fn auto_execute_threshold(&self) -> f64 {
        *self.auto_execute_threshold.read()
    }

    /// Snapshot of task ids awaiting reconciliation.
    pub fn pending_tasks(&self) -> Vec<String> {
        self.tasks.read().keys().cloned().collect()
    }

    /// [`Overseer::issue_task`] with the configured
    /// `default_task_timeout_seconds` deadline.
    pub async fn issue_task_with_default_timeout(
        &self,
        task_id: &str,
        desired_state: &str,
        payload: serde_json::Value,
    ) -> Result<(), OverseerError> {
        self.issue_task(task_id, desired_state, payload, self.default_task_timeout)
            .await
    }

    pub fn default_task_timeout(&self) -> Duration {
        self.default_task_timeout
    }

    /// Publish a command for `task_id` and block until telemetry reports
    /// `desired_state`, the timeout elapses, or the Overseer shuts down.
    ///
    /// The task entry is removed on every exit path, including when the
    /// returned future is dropped before completion.
    pub async fn issue_task(
        &self,
        task_id: &str,
        desired_state: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<(), OverseerError> {
        let bus = self.bus.as_ref().ok_or(OverseerError::TransportUnavailable)?;
        if self.cancel.is_cancelled() {
            return Err(OverseerError::Shutdown);
        }

        let (state, resolved) = TaskState::new(task_id, desired_state);
        {
            let mut tasks = self.tasks.write();
            if tasks.contains_key(task_id) {
                return Err(OverseerError::TaskAlreadyPending(task_id.to_string()));
            }
            tasks.insert(task_id.to_string(), Arc::clone(&state));
        }

        let registry = Arc::clone(&self.tasks);
        let registered = Arc::clone(&state);
        let _cleanup = scopeguard::guard((), move |_| {
            let mut tasks = registry.write();
            let ours = tasks
                .get(&registered.task_id)
                .is_some_and(|current| Arc::ptr_eq(current, &registered));
            if ours {
                tasks.remove(&registered.task_id);
            }
        });

        let command = Envelope::command(self.source_node.as_str(), task_id, payload);
        bus.publish(TOPIC_MISSION_TASK, command.to_bytes()?)?;

        info!(
            task_id = %task_id,
            desired_state = %desired_state,
            timeout_ms = timeout.as_millis() as u64,
            "Task issued; halted awaiting telemetry"
        );

        tokio::select! {
            result = resolved => match result {
                Ok(()) => {
                    info!(task_id = %task_id, "Task reconciled; advancing");
                    Ok(())
                }
                // Sender lives in `state`, which we hold; unreachable in practice
                Err(_) => Err(OverseerError::Shutdown),
            },
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    task_id = %task_id,
                    desired_state = %desired_state,
                    actual_state = ?state.actual_state(),
                    "Task timed out awaiting reconciliation"
                );
                Err(OverseerError::TimedOut {
                    task_id: task_id.to_string(),
                    desired_state: desired_state.to_string(),
                })
            }
            _ = self.cancel.cancelled() => Err(OverseerError::Shutdown),
        }
    }

    /// Screen one inbound telemetry message and reconcile the task it names.
    /// Safe to call concurrently for the same or different tasks.
    pub fn handle_telemetry(&self, data: &[u8]) -> TelemetryOutcome {
        let outcome = self.reconcile(data);
        metrics::counter!("swarm_overseer_telemetry_total", "outcome" => outcome.as_str())
            .increment(1);
        outcome
    }

    fn reconcile(&self, data: &[u8]) -> TelemetryOutcome {
        let envelope = match Envelope::parse_telemetry(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Rejected telemetry: {}", e);
                return TelemetryOutcome::Rejected;
            }
        };

        let threshold = self.auto_execute_threshold();
        if envelope.has_trust_score() && envelope.trust_score < threshold {
            warn!(
                source_node = %envelope.meta.source_node,
                trust_score = envelope.trust_score,
                threshold,
                "Governance halt; routing envelope for human review"
            );
            metrics::counter!("swarm_overseer_governance_halts_total").increment(1);
            let callback = self.governance_callback.read().clone();
            if let Some(callback) = callback {
                callback(&envelope);
            }
            return TelemetryOutcome::GovernanceHalt;
        }

        let Some(trace_id) = envelope.trace_id() else {
            return TelemetryOutcome::NoTrace;
        };

        let task = self.tasks.read().get(trace_id).cloned();
        let Some(task) = task else {
            debug!(trace_id = %trace_id, "Telemetry for unknown or finished task ignored");
            return TelemetryOutcome::Unmatched;
        };

        let report: StateReport = match envelope.decode_payload() {
            Ok(report) => report,
            Err(e) => {
                warn!(task_id = %task.task_id, "Failed to parse state from payload: {}", e);
                return TelemetryOutcome::MalformedState;
            }
        };

        task.record_actual(&report.state);
        if !task.is_reconciled_by(&report.state) {
            info!(
                task_id = %task.task_id,
                actual = %report.state,
                desired = %task.desired_state,
                "State mismatch; task still halted"
            );
            return TelemetryOutcome::Mismatch;
        }

        if task.resolve() {
            TelemetryOutcome::Resolved
        } else {
            TelemetryOutcome::AlreadyResolved
        }
    }
}

impl Drop for Overseer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swarm_control_core::domain::envelope::SignalType;

    fn telemetry(trace_id: &str, state: &str) -> Envelope {
        Envelope::new("team-a", SignalType::TaskComplete, json!({ "state": state }))
            .with_trace_id(trace_id)
    }

    #[test]
    fn test_threshold_is_clamped() {
        let overseer = Overseer::new(None, &OverseerConfig::default());
        assert_eq!(overseer.auto_execute_threshold(), 0.7);
        overseer.set_auto_execute_threshold(1.4);
        assert_eq!(overseer.auto_execute_threshold(), 1.0);
        overseer.set_auto_execute_threshold(-0.2);
        assert_eq!(overseer.auto_execute_threshold(), 0.0);
    }

    #[tokio::test]
    async fn test_issue_task_without_bus_fails_fast() {
        let overseer = Overseer::new(None, &OverseerConfig::default());
        let result = overseer
            .issue_task("t-1", "ready", json!({}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(OverseerError::TransportUnavailable)));
        assert!(overseer.pending_tasks().is_empty());
    }

    #[test]
    fn test_start_without_bus_is_degraded_not_fatal() {
        let overseer = Arc::new(Overseer::new(None, &OverseerConfig::default()));
        assert!(overseer.start().is_ok());
    }

    #[test]
    fn test_rejects_garbage_and_incomplete_envelopes() {
        let overseer = Overseer::new(None, &OverseerConfig::default());
        assert_eq!(overseer.handle_telemetry(b"not json"), TelemetryOutcome::Rejected);

        let mut missing_source = telemetry("t-1", "ready");
        missing_source.meta.source_node.clear();
        assert_eq!(
            overseer.handle_telemetry(&missing_source.to_bytes().unwrap()),
            TelemetryOutcome::Rejected
        );
    }

    #[test]
    fn test_unmatched_and_untraced_telemetry() {
        let overseer = Overseer::new(None, &OverseerConfig::default());
        let untraced = Envelope::new("team-a", SignalType::Heartbeat, json!({}));
        assert_eq!(
            overseer.handle_telemetry(&untraced.to_bytes().unwrap()),
            TelemetryOutcome::NoTrace
        );
        assert_eq!(
            overseer.handle_telemetry(&telemetry("ghost", "ready").to_bytes().unwrap()),
            TelemetryOutcome::Unmatched
        );
    }
}
