// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `swarm-control-reflexes`: Swarm Reflex Layer
//!
//! The two reactive loops of the control plane:
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `TaskState`, `TelemetryOutcome` |
//! | [`application`] | Application | `Overseer`, `TriggerStore`, `TriggerEngine` |
//!
//! ## Key Concepts
//!
//! - **Overseer**: issues a task command and blocks the issuer until team
//!   telemetry proves the desired state was reached. Low-trust telemetry is
//!   diverted to a governance callback instead of advancing the task.
//! - **Trigger rules**: tenant-scoped rules that react to mission events by
//!   launching or proposing a follow-up mission, guarded by cooldown,
//!   recursion depth, and concurrency limits.

pub mod application;
pub mod domain;

pub use application::*;
