// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: wire envelopes, mission events and runs, trigger rules, the
//! repository contracts over them, and process configuration.

pub mod config;
pub mod envelope;
pub mod events;
pub mod repository;
pub mod run;
pub mod topics;
pub mod trigger;
