// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Trigger Rules
//!
//! Declarative IF(event) THEN(launch mission) automation. A [`TriggerRule`]
//! names an event type to react to, the mission to launch, and the guard
//! parameters (cooldown, recursion depth, concurrency) that must pass before
//! it fires. Every evaluation leaves an append-only [`TriggerExecution`] audit
//! record behind.
//!
//! Rules are persisted through
//! [`TriggerRuleRepository`](crate::domain::repository::TriggerRuleRepository)
//! and cached by the reflex layer while active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TENANT_ID: &str = "default";
pub const DEFAULT_COOLDOWN_SECONDS: u32 = 60;
pub const DEFAULT_MAX_DEPTH: u32 = 5;
pub const DEFAULT_MAX_ACTIVE_RUNS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Hold the launch for human approval.
    #[default]
    Propose,
    AutoExecute,
}

impl TriggerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerMode::Propose => "propose",
            TriggerMode::AutoExecute => "auto_execute",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "propose" => Some(TriggerMode::Propose),
            "auto_execute" => Some(TriggerMode::AutoExecute),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Event type this rule reacts to, compared by exact equality.
    pub event_pattern: String,
    /// Reserved payload filter. Stored and returned, not yet evaluated.
    #[serde(default = "empty_condition")]
    pub condition: serde_json::Value,
    pub target_mission_id: String,
    #[serde(default)]
    pub mode: TriggerMode,
    pub cooldown_seconds: u32,
    pub max_depth: u32,
    pub max_active_runs: u32,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn empty_condition() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TriggerRule {
    pub fn matches(&self, event_type: &str) -> bool {
        self.is_active && self.event_pattern == event_type
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(u64::from(self.cooldown_seconds))
    }

    /// Whether the condition carries anything beyond `{}` / `null`.
    pub fn has_condition(&self) -> bool {
        match &self.condition {
            serde_json::Value::Null => false,
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// Replace zero guard parameters and an absent condition with defaults.
    pub fn apply_defaults(&mut self) {
        if self.cooldown_seconds == 0 {
            self.cooldown_seconds = DEFAULT_COOLDOWN_SECONDS;
        }
        if self.max_depth == 0 {
            self.max_depth = DEFAULT_MAX_DEPTH;
        }
        if self.max_active_runs == 0 {
            self.max_active_runs = DEFAULT_MAX_ACTIVE_RUNS;
        }
        if self.condition.is_null() {
            self.condition = empty_condition();
        }
        if self.tenant_id.is_empty() {
            self.tenant_id = DEFAULT_TENANT_ID.to_string();
        }
    }

    pub fn validate(&self) -> Result<(), TriggerValidationError> {
        if self.name.trim().is_empty() {
            return Err(TriggerValidationError::MissingName);
        }
        if self.event_pattern.trim().is_empty() {
            return Err(TriggerValidationError::MissingEventPattern);
        }
        if self.target_mission_id.trim().is_empty() {
            return Err(TriggerValidationError::MissingTargetMission);
        }
        Ok(())
    }

    /// Seconds since the rule last fired, or `None` if it never has.
    pub fn elapsed_since_fire(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_fired_at.map(|fired| now - fired)
    }

    /// Time since the last fire, if that is still inside the cooldown window.
    /// A `last_fired_at` ahead of `now` counts as zero elapsed.
    pub fn cooling_down(&self, now: DateTime<Utc>) -> Option<Duration> {
        let elapsed = self.elapsed_since_fire(now)?.to_std().unwrap_or(Duration::ZERO);
        (elapsed < self.cooldown()).then_some(elapsed)
    }
}

/// Rule creation input. Omitted guard parameters take the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTriggerRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub event_pattern: String,
    #[serde(default)]
    pub condition: Option<serde_json::Value>,
    pub target_mission_id: String,
    #[serde(default)]
    pub mode: Option<TriggerMode>,
    #[serde(default)]
    pub cooldown_seconds: Option<u32>,
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub max_active_runs: Option<u32>,
    #[serde(default)]
    pub is_active: bool,
}

impl NewTriggerRule {
    pub fn new(
        name: impl Into<String>,
        event_pattern: impl Into<String>,
        target_mission_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            event_pattern: event_pattern.into(),
            target_mission_id: target_mission_id.into(),
            is_active: true,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: TriggerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_cooldown(mut self, seconds: u32) -> Self {
        self.cooldown_seconds = Some(seconds);
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_active_runs(mut self, runs: u32) -> Self {
        self.max_active_runs = Some(runs);
        self
    }

    /// Assign an id and timestamps, then fill in defaults.
    pub fn into_rule(self, tenant_id: &str) -> TriggerRule {
        let now = Utc::now();
        let mut rule = TriggerRule {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: self.name,
            description: self.description,
            event_pattern: self.event_pattern,
            condition: self.condition.unwrap_or(serde_json::Value::Null),
            target_mission_id: self.target_mission_id,
            mode: self.mode.unwrap_or_default(),
            cooldown_seconds: self.cooldown_seconds.unwrap_or(0),
            max_depth: self.max_depth.unwrap_or(0),
            max_active_runs: self.max_active_runs.unwrap_or(0),
            is_active: self.is_active,
            last_fired_at: None,
            created_at: now,
            updated_at: now,
        };
        rule.apply_defaults();
        rule
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerValidationError {
    #[error("name is required")]
    MissingName,

    #[error("event_pattern is required")]
    MissingEventPattern,

    #[error("target_mission_id is required")]
    MissingTargetMission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Fired,
    Proposed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Fired => "fired",
            ExecutionStatus::Proposed => "proposed",
            ExecutionStatus::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fired" => Some(ExecutionStatus::Fired),
            "proposed" => Some(ExecutionStatus::Proposed),
            "skipped" => Some(ExecutionStatus::Skipped),
            _ => None,
        }
    }
}

/// The guard that blocked a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Cooldown,
    RecursionLimit,
    ConcurrencyLimit,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Cooldown => "cooldown",
            SkipReason::RecursionLimit => "recursion_limit",
            SkipReason::ConcurrencyLimit => "concurrency_limit",
        }
    }

    /// Audit text in the form `"<guard>: <detail>"`.
    pub fn describe(self, detail: &str) -> String {
        format!("{}: {}", self.as_str(), detail)
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record of one rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerExecution {
    pub id: String,
    pub rule_id: String,
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl TriggerExecution {
    fn record(
        rule_id: &str,
        event_id: &str,
        run_id: Option<String>,
        status: ExecutionStatus,
        skip_reason: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.to_string(),
            event_id: event_id.to_string(),
            run_id,
            status,
            skip_reason,
            executed_at: Utc::now(),
        }
    }

    pub fn fired(rule_id: &str, event_id: &str, child_run_id: Option<String>) -> Self {
        Self::record(rule_id, event_id, child_run_id, ExecutionStatus::Fired, None)
    }

    pub fn proposed(rule_id: &str, event_id: &str) -> Self {
        Self::record(rule_id, event_id, None, ExecutionStatus::Proposed, None)
    }

    pub fn skipped(rule_id: &str, event_id: &str, reason: SkipReason, detail: &str) -> Self {
        Self::record(
            rule_id,
            event_id,
            None,
            ExecutionStatus::Skipped,
            Some(reason.describe(detail)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_rule_takes_defaults() {
        let rule = NewTriggerRule::new("chain", "mission.completed", "m-2").into_rule("default");
        assert_eq!(rule.mode, TriggerMode::Propose);
        assert_eq!(rule.cooldown_seconds, 60);
        assert_eq!(rule.max_depth, 5);
        assert_eq!(rule.max_active_runs, 3);
        assert_eq!(rule.condition, json!({}));
        assert!(rule.is_active);
        assert!(rule.last_fired_at.is_none());
    }

    #[test]
    fn test_explicit_zero_guards_fall_back_to_defaults() {
        let rule = NewTriggerRule::new("chain", "mission.completed", "m-2")
            .with_cooldown(0)
            .with_max_depth(0)
            .into_rule("default");
        assert_eq!(rule.cooldown_seconds, DEFAULT_COOLDOWN_SECONDS);
        assert_eq!(rule.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_cooling_down_window() {
        let now = Utc::now();
        let mut rule = NewTriggerRule::new("chain", "mission.completed", "m-2")
            .with_cooldown(60)
            .into_rule("default");
        assert!(rule.cooling_down(now).is_none());

        rule.last_fired_at = Some(now - chrono::Duration::seconds(30));
        assert_eq!(rule.cooling_down(now), Some(Duration::from_secs(30)));

        rule.last_fired_at = Some(now - chrono::Duration::seconds(60));
        assert!(rule.cooling_down(now).is_none());

        rule.last_fired_at = Some(now + chrono::Duration::seconds(5));
        assert_eq!(rule.cooling_down(now), Some(Duration::ZERO));
    }

    #[test]
    fn test_validation_names_the_missing_field() {
        let mut rule = NewTriggerRule::new("chain", "mission.completed", "m-2").into_rule("default");
        assert!(rule.validate().is_ok());

        rule.target_mission_id = " ".to_string();
        assert_eq!(
            rule.validate(),
            Err(TriggerValidationError::MissingTargetMission)
        );
        rule.event_pattern.clear();
        assert_eq!(rule.validate(), Err(TriggerValidationError::MissingEventPattern));
        rule.name.clear();
        assert_eq!(rule.validate(), Err(TriggerValidationError::MissingName));
    }

    #[test]
    fn test_matching_is_exact_and_requires_active() {
        let mut rule = NewTriggerRule::new("chain", "mission.completed", "m-2").into_rule("default");
        assert!(rule.matches("mission.completed"));
        assert!(!rule.matches("mission.completed.partial"));
        assert!(!rule.matches("mission.*"));
        rule.is_active = false;
        assert!(!rule.matches("mission.completed"));
    }

    #[test]
    fn test_condition_detection() {
        let mut rule = NewTriggerRule::new("chain", "mission.completed", "m-2").into_rule("default");
        assert!(!rule.has_condition());
        rule.condition = json!({"payload.status": "ok"});
        assert!(rule.has_condition());
    }

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(
            serde_json::to_value(TriggerMode::AutoExecute).unwrap(),
            json!("auto_execute")
        );
        assert_eq!(TriggerMode::parse(""), Some(TriggerMode::Propose));
        assert_eq!(TriggerMode::parse("yolo"), None);
    }

    #[test]
    fn test_skipped_execution_records_reason_text() {
        let exec = TriggerExecution::skipped(
            "rule-1",
            "ev-1",
            SkipReason::RecursionLimit,
            "source run depth 5 >= max 5",
        );
        assert_eq!(exec.status, ExecutionStatus::Skipped);
        assert_eq!(
            exec.skip_reason.as_deref(),
            Some("recursion_limit: source run depth 5 >= max 5")
        );
        assert!(exec.run_id.is_none());
    }
}
