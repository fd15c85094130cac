// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Trigger Evaluation Engine
//!
//! Consumes mission event summaries from `swarm.mission.events.*`, matches
//! them against the active rule cache and runs each matching rule through the
//! guard pipeline:
//!
//! 1. cooldown since `last_fired_at`
//! 2. recursion depth of the source run
//! 3. active runs of the target mission (fails open)
//! 4. payload condition (reserved; always passes)
//!
//! A rule that clears every guard either launches a child run
//! (`auto_execute`) or records a proposal on the source run for approval
//! (`propose`). Every outcome leaves a `TriggerExecution` audit row.
//!
//! Rules are evaluated one after another within an event. Nothing orders
//! concurrent events, and the cooldown check and the `last_fired_at` write
//! are not atomic: two near-simultaneous events can both fire the same rule.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use swarm_control_core::domain::events::{
    EventEmitter, EventSeverity, MissionEventSummary, MissionEventType,
};
use swarm_control_core::domain::run::RunLifecycleManager;
use swarm_control_core::domain::topics::TOPIC_MISSION_EVENTS_WILDCARD;
use swarm_control_core::domain::trigger::{SkipReason, TriggerExecution, TriggerMode, TriggerRule};
use swarm_control_core::infrastructure::message_bus::{
    spawn_dispatch, BusError, BusLifecycleEvent, MessageBus,
};

use crate::application::trigger_store::{TriggerError, TriggerStore};

/// `source_agent` stamped on events the engine emits.
pub const TRIGGER_ENGINE_AGENT: &str = "trigger-engine";

/// Result of evaluating one rule against one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Fired {
        rule_id: String,
        child_run_id: Option<String>,
    },
    Proposed {
        rule_id: String,
    },
    Skipped {
        rule_id: String,
        reason: SkipReason,
        detail: String,
    },
    /// Guards passed but the child run could not be created.
    Aborted {
        rule_id: String,
    },
}

impl RuleOutcome {
    pub fn rule_id(&self) -> &str {
        match self {
            RuleOutcome::Fired { rule_id, .. }
            | RuleOutcome::Proposed { rule_id }
            | RuleOutcome::Skipped { rule_id, .. }
            | RuleOutcome::Aborted { rule_id } => rule_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOutcome::Fired { .. } => "fired",
            RuleOutcome::Proposed { .. } => "proposed",
            RuleOutcome::Skipped { reason, .. } => reason.as_str(),
            RuleOutcome::Aborted { .. } => "aborted",
        }
    }
}

pub struct TriggerEngine {
    store: Arc<TriggerStore>,
    events: Option<Arc<dyn EventEmitter>>,
    runs: Option<Arc<dyn RunLifecycleManager>>,
    bus: Option<MessageBus>,
    cancel: Mutex<CancellationToken>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerEngine {
    pub fn new(
        store: Arc<TriggerStore>,
        events: Option<Arc<dyn EventEmitter>>,
        runs: Option<Arc<dyn RunLifecycleManager>>,
        bus: Option<MessageBus>,
    ) -> Self {
        Self {
            store,
            events,
            runs,
            bus,
            cancel: Mutex::new(CancellationToken::new()),
            pumps: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<TriggerStore> {
        &self.store
    }

    /// Load rules, subscribe to mission events, and resync on every bus
    /// reconnect. Without a bus the engine stays idle.
    pub async fn start(self: &Arc<Self>) -> Result<(), BusError> {
        let Some(bus) = &self.bus else {
            warn!("Trigger engine started without a message bus; running degraded");
            return Ok(());
        };

        if let Err(e) = self.store.load_active_rules().await {
            // Not fatal: a reconnect or explicit reload fills the cache later
            warn!("Failed to load active trigger rules: {}", e);
        }

        let subscription = bus.subscribe(TOPIC_MISSION_EVENTS_WILDCARD)?;
        let cancel = self.cancel.lock().clone();

        let engine = Arc::clone(self);
        let event_pump = spawn_dispatch(subscription, cancel.child_token(), move |message| {
            let engine = Arc::clone(&engine);
            async move {
                engine.handle_event(&message.payload).await;
            }
        });

        let engine = Arc::clone(self);
        let mut lifecycle = bus.lifecycle();
        let lifecycle_cancel = cancel.child_token();
        let lifecycle_pump = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = lifecycle_cancel.cancelled() => break,
                    event = lifecycle.recv() => event,
                };
                match event {
                    Ok(BusLifecycleEvent::Reconnected) | Err(RecvError::Lagged(_)) => {
                        info!("Bus reconnected; resynchronising trigger rules");
                        if let Err(e) = engine.resync().await {
                            warn!("Trigger rule resync failed: {}", e);
                        }
                    }
                    Ok(BusLifecycleEvent::Disconnected) => {
                        warn!("Bus disconnected; trigger rule cache may go stale");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.pumps.lock().extend([event_pump, lifecycle_pump]);
        info!(topic = TOPIC_MISSION_EVENTS_WILDCARD, "Trigger engine started");
        Ok(())
    }

    /// Stop consuming events. `start` may be called again afterwards.
    pub fn stop(&self) {
        let previous = std::mem::take(&mut *self.cancel.lock());
        previous.cancel();
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        info!("Trigger engine stopped");
    }

    pub async fn reload_rules(&self) -> Result<usize, TriggerError> {
        self.store.load_active_rules().await
    }

    /// Rebuild the rule cache from storage. Idempotent.
    pub async fn resync(&self) -> Result<usize, TriggerError> {
        self.reload_rules().await
    }

    /// Evaluate one raw mission event summary against every matching rule.
    pub async fn handle_event(&self, data: &[u8]) -> Vec<RuleOutcome> {
        let summary = match MissionEventSummary::decode(data) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Dropping undecodable mission event summary: {}", e);
                return Vec::new();
            }
        };

        // The engine's own announcements must never re-enter it
        if summary.event_type.is_trigger_lifecycle() {
            return Vec::new();
        }

        let rules = self.store.matching_rules(summary.event_type.as_str());
        if rules.is_empty() {
            return Vec::new();
        }

        let source_depth = self.source_depth(&summary.run_id).await;

        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in rules {
            let outcome = self.evaluate_rule(&rule, &summary, source_depth).await;
            metrics::counter!("swarm_trigger_evaluations_total", "outcome" => outcome.as_str())
                .increment(1);
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Depth of the run that produced the event. Unknown runs, lookup
    /// failures and a missing run manager all count as depth 0.
    async fn source_depth(&self, run_id: &str) -> u32 {
        let Some(runs) = &self.runs else {
            return 0;
        };
        if run_id.is_empty() {
            return 0;
        }
        match runs.get_run(run_id).await {
            Ok(run) => run.run_depth,
            Err(e) => {
                debug!(run_id = %run_id, "Source run lookup failed; assuming depth 0: {}", e);
                0
            }
        }
    }

    async fn evaluate_rule(
        &self,
        rule: &TriggerRule,
        event: &MissionEventSummary,
        source_depth: u32,
    ) -> RuleOutcome {
        let now = Utc::now();

        if let Some(elapsed) = rule.cooling_down(now) {
            let detail = format!(
                "{:.0}s since last fire, cooldown is {}s",
                elapsed.as_secs_f64(),
                rule.cooldown_seconds
            );
            return self.skip(rule, event, SkipReason::Cooldown, detail).await;
        }

        if source_depth >= rule.max_depth {
            let detail = format!("source run depth {} >= max {}", source_depth, rule.max_depth);
            return self.skip(rule, event, SkipReason::RecursionLimit, detail).await;
        }

        match self.store.active_count(&rule.target_mission_id).await {
            Ok(active) if active >= u64::from(rule.max_active_runs) => {
                let detail = format!("{} active runs >= max {}", active, rule.max_active_runs);
                return self
                    .skip(rule, event, SkipReason::ConcurrencyLimit, detail)
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    target_mission_id = %rule.target_mission_id,
                    "Active run count unavailable; allowing trigger: {}",
                    e
                );
            }
        }

        if rule.has_condition() {
            info!(
                rule_id = %rule.id,
                "Rule has a condition; condition matching not yet implemented, allowing"
            );
        }

        match rule.mode {
            TriggerMode::AutoExecute => self.fire(rule, event, source_depth + 1, now).await,
            TriggerMode::Propose => self.propose(rule, event, now).await,
        }
    }

    async fn fire(
        &self,
        rule: &TriggerRule,
        event: &MissionEventSummary,
        child_depth: u32,
        now: DateTime<Utc>,
    ) -> RuleOutcome {
        let child_run_id = match &self.runs {
            Some(runs) => match runs
                .create_child_run(&rule.target_mission_id, &event.run_id, child_depth)
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    error!(
                        rule_id = %rule.id,
                        target_mission_id = %rule.target_mission_id,
                        "Failed to create child run; trigger not fired: {}",
                        e
                    );
                    return RuleOutcome::Aborted {
                        rule_id: rule.id.clone(),
                    };
                }
            },
            None => None,
        };

        self.store.update_last_fired(&rule.id, now).await;

        if let Some(child_run_id) = &child_run_id {
            self.emit_fired(
                child_run_id,
                serde_json::json!({
                    "trigger_rule_id": rule.id,
                    "trigger_rule_name": rule.name,
                    "source_event_id": event.mission_event_id,
                    "source_run_id": event.run_id,
                    "target_mission_id": rule.target_mission_id,
                    "mode": rule.mode.as_str(),
                }),
            )
            .await;
        }

        self.record(TriggerExecution::fired(
            &rule.id,
            &event.mission_event_id,
            child_run_id.clone(),
        ))
        .await;

        info!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            child_run_id = ?child_run_id,
            depth = child_depth,
            "Trigger fired"
        );
        RuleOutcome::Fired {
            rule_id: rule.id.clone(),
            child_run_id,
        }
    }

    async fn propose(
        &self,
        rule: &TriggerRule,
        event: &MissionEventSummary,
        now: DateTime<Utc>,
    ) -> RuleOutcome {
        // Proposals count against the cooldown too
        self.store.update_last_fired(&rule.id, now).await;

        if !event.run_id.is_empty() {
            self.emit_fired(
                &event.run_id,
                serde_json::json!({
                    "trigger_rule_id": rule.id,
                    "trigger_rule_name": rule.name,
                    "source_event_id": event.mission_event_id,
                    "target_mission_id": rule.target_mission_id,
                    "mode": TriggerMode::Propose.as_str(),
                    "awaiting_approval": true,
                }),
            )
            .await;
        }

        self.record(TriggerExecution::proposed(&rule.id, &event.mission_event_id))
            .await;

        info!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            target_mission_id = %rule.target_mission_id,
            "Trigger proposed; awaiting approval"
        );
        RuleOutcome::Proposed {
            rule_id: rule.id.clone(),
        }
    }

    async fn skip(
        &self,
        rule: &TriggerRule,
        event: &MissionEventSummary,
        reason: SkipReason,
        detail: String,
    ) -> RuleOutcome {
        info!(rule_id = %rule.id, reason = %reason, detail = %detail, "Trigger skipped");
        self.record(TriggerExecution::skipped(
            &rule.id,
            &event.mission_event_id,
            reason,
            &detail,
        ))
        .await;
        RuleOutcome::Skipped {
            rule_id: rule.id.clone(),
            reason,
            detail,
        }
    }

    async fn emit_fired(&self, run_id: &str, payload: serde_json::Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(e) = events
            .emit(
                run_id,
                MissionEventType::TriggerFired,
                EventSeverity::Info,
                TRIGGER_ENGINE_AGENT,
                "",
                payload,
            )
            .await
        {
            warn!(run_id = %run_id, "Failed to emit trigger.fired: {}", e);
        }
    }

    async fn record(&self, execution: TriggerExecution) {
        if let Err(e) = self.store.log_execution(&execution).await {
            warn!(rule_id = %execution.rule_id, "Failed to log trigger execution: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swarm_control_core::domain::trigger::NewTriggerRule;
    use swarm_control_core::infrastructure::repositories::InMemoryTriggerRuleRepository;

    fn summary(event_type: &str, run_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "mission_event_id": "ev-1",
            "run_id": run_id,
            "event_type": event_type,
            "source_agent": "planner",
        }))
        .unwrap()
    }

    async fn engine_with_rule(mode: TriggerMode) -> (TriggerEngine, TriggerRule) {
        let repo = InMemoryTriggerRuleRepository::new();
        let store = Arc::new(TriggerStore::new(Some(Arc::new(repo))));
        let rule = store
            .create(NewTriggerRule::new("chain", "mission.completed", "m-next").with_mode(mode))
            .await
            .unwrap();
        (TriggerEngine::new(store, None, None, None), rule)
    }

    #[tokio::test]
    async fn test_undecodable_summary_is_dropped() {
        let (engine, _) = engine_with_rule(TriggerMode::Propose).await;
        assert!(engine.handle_event(b"{oops").await.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_lifecycle_events_are_ignored() {
        let repo = InMemoryTriggerRuleRepository::new();
        let store = Arc::new(TriggerStore::new(Some(Arc::new(repo))));
        store
            .create(NewTriggerRule::new("loop", "trigger.fired", "m-next"))
            .await
            .unwrap();
        let engine = TriggerEngine::new(store, None, None, None);

        assert!(engine.handle_event(&summary("trigger.fired", "r1")).await.is_empty());
        assert!(engine.handle_event(&summary("trigger.skipped", "r1")).await.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_event_type_produces_nothing() {
        let (engine, _) = engine_with_rule(TriggerMode::Propose).await;
        assert!(engine.handle_event(&summary("mission.failed", "r1")).await.is_empty());
    }

    #[tokio::test]
    async fn test_auto_execute_without_run_manager_fires_without_child() {
        let (engine, rule) = engine_with_rule(TriggerMode::AutoExecute).await;
        let outcomes = engine.handle_event(&summary("mission.completed", "r1")).await;
        assert_eq!(
            outcomes,
            vec![RuleOutcome::Fired {
                rule_id: rule.id.clone(),
                child_run_id: None
            }]
        );
        assert!(engine.store().cached_rule(&rule.id).unwrap().last_fired_at.is_some());
    }

    #[tokio::test]
    async fn test_start_without_bus_is_degraded() {
        let (engine, _) = engine_with_rule(TriggerMode::Propose).await;
        let engine = Arc::new(engine);
        assert!(engine.start().await.is_ok());
        engine.stop();
    }

    #[test]
    fn test_outcome_labels() {
        let skipped = RuleOutcome::Skipped {
            rule_id: "r".to_string(),
            reason: SkipReason::ConcurrencyLimit,
            detail: String::new(),
        };
        assert_eq!(skipped.as_str(), "concurrency_limit");
        assert_eq!(skipped.rule_id(), "r");
    }
}
