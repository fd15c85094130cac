// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application services for the reflex layer.

pub mod overseer;
pub mod trigger_engine;
pub mod trigger_store;

pub use overseer::{GovernanceCallback, Overseer, OverseerError};
pub use trigger_engine::{RuleOutcome, TriggerEngine, TRIGGER_ENGINE_AGENT};
pub use trigger_store::{TriggerError, TriggerStore, DEFAULT_EXECUTION_HISTORY_LIMIT};
