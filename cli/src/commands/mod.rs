// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the swarm control plane CLI

pub mod config;
pub mod envelope;
pub mod serve;

pub use self::config::ConfigCommand;
pub use self::envelope::EnvelopeCommand;
