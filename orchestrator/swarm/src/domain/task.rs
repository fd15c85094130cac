// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task reconciliation state.
//!
//! A [`TaskState`] lives only while its issuer is blocked waiting for
//! telemetry to prove `desired_state` was reached. Resolution is a single-fire
//! signal: the first matching report wins and every later one is a no-op.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug)]
pub struct TaskState {
    pub task_id: String,
    pub desired_state: String,
    pub issued_at: DateTime<Utc>,
    actual_state: Mutex<Option<String>>,
    resolved: Mutex<Option<oneshot::Sender<()>>>,
}

impl TaskState {
    /// Create a task and the receiver its issuer blocks on.
    pub fn new(
        task_id: impl Into<String>,
        desired_state: impl Into<String>,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Self {
            task_id: task_id.into(),
            desired_state: desired_state.into(),
            issued_at: Utc::now(),
            actual_state: Mutex::new(None),
            resolved: Mutex::new(Some(tx)),
        });
        (state, rx)
    }

    pub fn record_actual(&self, actual: &str) {
        *self.actual_state.lock() = Some(actual.to_string());
    }

    pub fn actual_state(&self) -> Option<String> {
        self.actual_state.lock().clone()
    }

    pub fn is_reconciled_by(&self, actual: &str) -> bool {
        self.desired_state == actual
    }

    /// Fire the resolution signal. Returns true only for the call that fired it.
    pub fn resolve(&self) -> bool {
        match self.resolved.lock().take() {
            Some(tx) => {
                // The issuer may have given up already; that is still a resolution
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.lock().is_none()
    }
}

/// Payload shape telemetry uses to report state: `{"state": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReport {
    pub state: String,
}

/// What the telemetry handler did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryOutcome {
    /// Unparseable or failed validation; dropped.
    Rejected,
    /// Scored below the auto-execute threshold; routed to governance.
    GovernanceHalt,
    /// No trace id to correlate.
    NoTrace,
    /// No pending task for the trace id.
    Unmatched,
    /// Payload did not carry a state report.
    MalformedState,
    /// Reported state differs from the desired state; task stays halted.
    Mismatch,
    Resolved,
    /// State matched but another report resolved the task first.
    AlreadyResolved,
}

impl TelemetryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetryOutcome::Rejected => "rejected",
            TelemetryOutcome::GovernanceHalt => "governance_halt",
            TelemetryOutcome::NoTrace => "no_trace",
            TelemetryOutcome::Unmatched => "unmatched",
            TelemetryOutcome::MalformedState => "malformed_state",
            TelemetryOutcome::Mismatch => "mismatch",
            TelemetryOutcome::Resolved => "resolved",
            TelemetryOutcome::AlreadyResolved => "already_resolved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_fires_exactly_once() {
        let (state, rx) = TaskState::new("t-1", "ready");
        assert!(!state.is_resolved());
        assert!(state.resolve());
        assert!(!state.resolve());
        assert!(state.is_resolved());
        rx.await.unwrap();
    }

    #[test]
    fn test_resolve_after_issuer_gave_up_does_not_panic() {
        let (state, rx) = TaskState::new("t-1", "ready");
        drop(rx);
        assert!(state.resolve());
        assert!(!state.resolve());
    }

    #[test]
    fn test_actual_state_is_recorded() {
        let (state, _rx) = TaskState::new("t-1", "ready");
        assert!(state.actual_state().is_none());
        state.record_actual("booting");
        assert_eq!(state.actual_state().as_deref(), Some("booting"));
        assert!(!state.is_reconciled_by("booting"));
        assert!(state.is_reconciled_by("ready"));
    }
}
