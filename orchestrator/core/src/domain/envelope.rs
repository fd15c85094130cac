// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Telemetry Envelope
//!
//! The provenance-tagged wrapper every agent and sensor output travels in.
//! Anything published on `swarm.team.*.telemetry` must parse into an
//! [`Envelope`] and pass [`Envelope::validate`] before the Overseer will look
//! at it.
//!
//! Wire shape (JSON):
//!
//! ```json
//! {
//!   "meta": { "source_node": "sensor-7", "timestamp": "2026-01-01T00:00:00Z", "trace_id": "task-1" },
//!   "signal_type": "telemetry",
//!   "trust_score": 0.9,
//!   "payload": { "state": "ready" }
//! }
//! ```
//!
//! A `trust_score` of `0` (or an absent field) means "unscored". Producers
//! that predate the governance valve never set it, so it must not be read as
//! an explicit score of zero.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 0001-01-01T00:00:00Z, the zero instant some producers emit instead of
/// omitting the field.
const ZERO_INSTANT_SECS: i64 = -62_135_596_800;

/// Classifies a signal flowing through the bus.
///
/// Unknown signal types are preserved as [`SignalType::Custom`] so newer
/// producers are not rejected by older consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignalType {
    #[default]
    Unspecified,
    Telemetry,
    TaskComplete,
    TaskFailed,
    Error,
    Heartbeat,
    GovernanceHalt,
    SensorData,
    ChatResponse,
    BlueprintProposal,
    Custom(String),
}

impl SignalType {
    pub fn as_str(&self) -> &str {
        match self {
            SignalType::Unspecified => "",
            SignalType::Telemetry => "telemetry",
            SignalType::TaskComplete => "task_complete",
            SignalType::TaskFailed => "task_failed",
            SignalType::Error => "error",
            SignalType::Heartbeat => "heartbeat",
            SignalType::GovernanceHalt => "governance_halt",
            SignalType::SensorData => "sensor_data",
            SignalType::ChatResponse => "chat_response",
            SignalType::BlueprintProposal => "blueprint_proposal",
            SignalType::Custom(other) => other,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl From<String> for SignalType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" => SignalType::Unspecified,
            "telemetry" => SignalType::Telemetry,
            "task_complete" => SignalType::TaskComplete,
            "task_failed" => SignalType::TaskFailed,
            "error" => SignalType::Error,
            "heartbeat" => SignalType::Heartbeat,
            "governance_halt" => SignalType::GovernanceHalt,
            "sensor_data" => SignalType::SensorData,
            "chat_response" => SignalType::ChatResponse,
            "blueprint_proposal" => SignalType::BlueprintProposal,
            _ => SignalType::Custom(value),
        }
    }
}

impl From<SignalType> for String {
    fn from(value: SignalType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default trust scores by node category.
///
/// Sensory and ledger nodes report facts; cognitive (LLM) nodes have to earn
/// trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustCategory {
    Sensory,
    Cognitive,
    Actuation,
    Ledger,
}

impl TrustCategory {
    pub fn default_score(self) -> f64 {
        match self {
            TrustCategory::Sensory => 1.0,
            TrustCategory::Cognitive => 0.5,
            TrustCategory::Actuation => 0.8,
            TrustCategory::Ledger => 1.0,
        }
    }
}

/// Provenance metadata carried by every envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    #[serde(default)]
    pub source_node: String,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Correlates telemetry with the task that asked for it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
}

impl EnvelopeMeta {
    fn has_timestamp(&self) -> bool {
        matches!(self.timestamp, Some(ts) if ts.timestamp() != ZERO_INSTANT_SECS)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub meta: EnvelopeMeta,

    #[serde(default)]
    pub signal_type: SignalType,

    #[serde(default, skip_serializing_if = "is_unscored")]
    pub trust_score: f64,

    #[serde(default)]
    pub payload: Option<serde_json::Value>,

    /// Links a bus signal back to its persisted mission event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_event_id: Option<String>,
}

fn is_unscored(score: &f64) -> bool {
    *score == 0.0
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("meta.source_node is required")]
    MissingSourceNode,

    #[error("meta.timestamp is required")]
    MissingTimestamp,

    #[error("signal_type is required")]
    MissingSignalType,

    #[error("payload is required")]
    MissingPayload,

    #[error("trust_score {0} is outside [0, 1]")]
    TrustScoreOutOfRange(f64),

    #[error("payload does not match the expected shape: {0}")]
    PayloadShape(#[source] serde_json::Error),
}

impl Envelope {
    /// Build an outbound envelope stamped with the current time.
    pub fn new(
        source_node: impl Into<String>,
        signal_type: SignalType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            meta: EnvelopeMeta {
                source_node: source_node.into(),
                timestamp: Some(Utc::now()),
                trace_id: String::new(),
            },
            signal_type,
            trust_score: 0.0,
            payload: Some(payload),
            mission_event_id: None,
        }
    }

    /// Command envelope the Overseer publishes for a task. The task id doubles
    /// as the trace id so returning telemetry can be matched to it.
    pub fn command(
        source_node: impl Into<String>,
        task_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(source_node, SignalType::Telemetry, payload).with_trace_id(task_id)
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.meta.trace_id = trace_id.into();
        self
    }

    pub fn with_trust_score(mut self, score: f64) -> Self {
        self.trust_score = score;
        self
    }

    /// Enforce the schema contract. Checks run in a fixed order so the first
    /// missing field is the one reported.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.meta.source_node.is_empty() {
            return Err(EnvelopeError::MissingSourceNode);
        }
        if !self.meta.has_timestamp() {
            return Err(EnvelopeError::MissingTimestamp);
        }
        if self.signal_type.is_empty() {
            return Err(EnvelopeError::MissingSignalType);
        }
        if self.payload.is_none() {
            return Err(EnvelopeError::MissingPayload);
        }
        if !(0.0..=1.0).contains(&self.trust_score) {
            return Err(EnvelopeError::TrustScoreOutOfRange(self.trust_score));
        }
        Ok(())
    }

    /// True iff the producer set an explicit score. Zero means unscored.
    pub fn has_trust_score(&self) -> bool {
        self.trust_score > 0.0
    }

    /// Parse raw bus bytes and validate them in one step.
    pub fn parse_telemetry(data: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_slice(data).map_err(EnvelopeError::Malformed)?;
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn trace_id(&self) -> Option<&str> {
        if self.meta.trace_id.is_empty() {
            None
        } else {
            Some(&self.meta.trace_id)
        }
    }

    /// Decode the opaque payload into a concrete report type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        let payload = self.payload.clone().ok_or(EnvelopeError::MissingPayload)?;
        serde_json::from_value(payload).map_err(EnvelopeError::PayloadShape)
    }
}
