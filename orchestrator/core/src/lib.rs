// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Swarm control plane core
//!
//! Shared primitives for the reflex engines.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Envelope protocol, mission events, trigger rule model,
//!   in-process message bus, and persistence

pub mod domain;
pub mod infrastructure;

pub use domain::*;
