// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Envelope tooling
//!
//! `validate` runs a JSON file through the same schema check the Overseer
//! applies to inbound telemetry and reports how the governance valve would
//! treat it.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use swarm_control_core::domain::config::ControlPlaneConfig;
use swarm_control_core::domain::envelope::Envelope;

#[derive(Subcommand)]
pub enum EnvelopeCommand {
    /// Validate an envelope JSON file
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

pub async fn handle_command(
    command: EnvelopeCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        EnvelopeCommand::Validate { file } => validate(file, config_override).await,
    }
}

async fn validate(file: PathBuf, config_override: Option<PathBuf>) -> Result<()> {
    let config = ControlPlaneConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let data = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;

    let envelope = Envelope::parse_telemetry(&data)
        .with_context(|| format!("{} is not a valid envelope", file.display()))?;

    println!("{}", "✓ Envelope is valid".green());
    println!("  Source node: {}", envelope.meta.source_node);
    println!("  Signal type: {}", envelope.signal_type.as_str());
    if let Some(trace_id) = envelope.trace_id() {
        println!("  Trace id: {}", trace_id);
    }
    println!(
        "  Trust: {}",
        trust_verdict(&envelope, config.spec.overseer.auto_execute_threshold)
    );

    Ok(())
}

fn trust_verdict(envelope: &Envelope, threshold: f64) -> String {
    if !envelope.has_trust_score() {
        return "unscored (bypasses governance)".to_string();
    }
    if envelope.trust_score < threshold {
        format!(
            "{} < {} (halted for human review)",
            envelope.trust_score, threshold
        )
    } else {
        format!("{} >= {} (auto-execute)", envelope.trust_score, threshold)
    }
}
