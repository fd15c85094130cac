// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bus subject names shared by producers and the reflex engines.

/// Task commands issued by the Overseer.
pub const TOPIC_MISSION_TASK: &str = "swarm.mission.task";

/// Telemetry from every team.
pub const TOPIC_TEAM_TELEMETRY_WILDCARD: &str = "swarm.team.*.telemetry";

/// Lightweight mission event summaries, one subject per run.
pub const TOPIC_MISSION_EVENTS_WILDCARD: &str = "swarm.mission.events.*";

pub fn team_telemetry_topic(team_id: &str) -> String {
    format!("swarm.team.{}.telemetry", team_id)
}

pub fn mission_events_topic(run_id: &str) -> String {
    format!("swarm.mission.events.{}", run_id)
}

/// Whether `value` can stand as one subject token, so that
/// `swarm.mission.events.{value}` is matched by the run wildcard.
pub fn is_subject_token(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
}
