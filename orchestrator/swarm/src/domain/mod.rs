// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reflex Domain Layer
//!
//! Pure reconciliation types. No I/O dependencies.

pub mod task;

pub use task::{StateReport, TaskState, TelemetryOutcome};
