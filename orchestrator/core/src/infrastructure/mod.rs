// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod event_audit;
pub mod message_bus;
pub mod repositories;

pub use event_audit::AuditEventEmitter;
pub use message_bus::{BusError, BusLifecycleEvent, BusMessage, MessageBus, Subscription};
