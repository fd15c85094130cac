// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the Overseer reconciliation loop.
//!
//! A fake team listens on `swarm.mission.task` and answers on its telemetry
//! subject, the way a deployed team would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use swarm_control_core::domain::config::OverseerConfig;
use swarm_control_core::domain::envelope::{Envelope, SignalType};
use swarm_control_core::domain::topics::{team_telemetry_topic, TOPIC_MISSION_TASK};
use swarm_control_core::infrastructure::MessageBus;
use swarm_control_reflexes::domain::TelemetryOutcome;
use swarm_control_reflexes::{Overseer, OverseerError};

fn overseer(bus: &MessageBus) -> Arc<Overseer> {
    let overseer = Arc::new(Overseer::new(Some(bus.clone()), &OverseerConfig::default()));
    overseer.start().unwrap();
    overseer
}

fn report(task_id: &str, state: &str) -> Envelope {
    Envelope::new("team-a", SignalType::TaskComplete, json!({ "state": state }))
        .with_trace_id(task_id)
}

async fn wait_for_pending(overseer: &Overseer, task_id: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !overseer.pending_tasks().iter().any(|id| id == task_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task never registered");
}

#[tokio::test]
async fn test_task_resolves_when_team_reports_desired_state() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);

    // Fake team: acknowledge every command with a "deployed" report
    let mut commands = bus.subscribe(TOPIC_MISSION_TASK).unwrap();
    let team_bus = bus.clone();
    let team = tokio::spawn(async move {
        let message = commands.recv().await.unwrap();
        let command = Envelope::parse_telemetry(&message.payload).unwrap();
        assert_eq!(command.meta.source_node, "overseer");
        assert_eq!(command.payload, Some(json!({"image": "api:1.4"})));
        let task_id = command.trace_id().unwrap().to_string();
        team_bus
            .publish(
                &team_telemetry_topic("team-a"),
                report(&task_id, "deployed").to_bytes().unwrap(),
            )
            .unwrap();
    });

    overseer
        .issue_task(
            "deploy-1",
            "deployed",
            json!({"image": "api:1.4"}),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    team.await.unwrap();
    assert!(overseer.pending_tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_task_times_out_and_is_cleaned_up() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);

    let result = overseer
        .issue_task("deploy-1", "deployed", json!({}), Duration::from_secs(30))
        .await;

    match result {
        Err(OverseerError::TimedOut {
            task_id,
            desired_state,
        }) => {
            assert_eq!(task_id, "deploy-1");
            assert_eq!(desired_state, "deployed");
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(overseer.pending_tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_configured_default_timeout_applies() {
    let bus = MessageBus::new(64);
    let config = OverseerConfig {
        default_task_timeout_seconds: 2,
        ..OverseerConfig::default()
    };
    let overseer = Arc::new(Overseer::new(Some(bus.clone()), &config));
    overseer.start().unwrap();
    assert_eq!(overseer.default_task_timeout(), Duration::from_secs(2));

    let started = tokio::time::Instant::now();
    let result = overseer
        .issue_task_with_default_timeout("deploy-1", "deployed", json!({}))
        .await;

    assert!(matches!(result, Err(OverseerError::TimedOut { .. })));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2));
    assert!(waited < Duration::from_secs(30));
    assert!(overseer.pending_tasks().is_empty());
}

#[tokio::test]
async fn test_mismatched_state_keeps_task_halted() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);

    let issuer = {
        let overseer = Arc::clone(&overseer);
        tokio::spawn(async move {
            overseer
                .issue_task("deploy-1", "deployed", json!({}), Duration::from_millis(300))
                .await
        })
    };
    wait_for_pending(&overseer, "deploy-1").await;

    let outcome = overseer.handle_telemetry(&report("deploy-1", "pulling").to_bytes().unwrap());
    assert_eq!(outcome, TelemetryOutcome::Mismatch);
    assert_eq!(overseer.pending_tasks(), vec!["deploy-1".to_string()]);

    let result = issuer.await.unwrap();
    assert!(matches!(result, Err(OverseerError::TimedOut { .. })));
    assert!(overseer.pending_tasks().is_empty());
}

#[tokio::test]
async fn test_low_trust_report_is_routed_to_governance_and_never_resolves() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);
    let halted = Arc::new(AtomicUsize::new(0));
    {
        let halted = Arc::clone(&halted);
        overseer.set_governance_callback(Arc::new(move |envelope: &Envelope| {
            assert_eq!(envelope.trust_score, 0.4);
            halted.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let issuer = {
        let overseer = Arc::clone(&overseer);
        tokio::spawn(async move {
            overseer
                .issue_task("wire-funds", "sent", json!({}), Duration::from_millis(300))
                .await
        })
    };
    wait_for_pending(&overseer, "wire-funds").await;

    let suspicious = report("wire-funds", "sent").with_trust_score(0.4);
    let outcome = overseer.handle_telemetry(&suspicious.to_bytes().unwrap());
    assert_eq!(outcome, TelemetryOutcome::GovernanceHalt);
    assert_eq!(halted.load(Ordering::SeqCst), 1);

    let result = issuer.await.unwrap();
    assert!(matches!(result, Err(OverseerError::TimedOut { .. })));
    assert_eq!(halted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_trusted_report_above_threshold_resolves() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);
    overseer.set_auto_execute_threshold(0.5);

    let issuer = {
        let overseer = Arc::clone(&overseer);
        tokio::spawn(async move {
            overseer
                .issue_task("scan-1", "clean", json!({}), Duration::from_secs(5))
                .await
        })
    };
    wait_for_pending(&overseer, "scan-1").await;

    let trusted = report("scan-1", "clean").with_trust_score(0.9);
    assert_eq!(
        overseer.handle_telemetry(&trusted.to_bytes().unwrap()),
        TelemetryOutcome::Resolved
    );
    issuer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_duplicate_task_id_is_rejected_while_pending() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);

    let first = {
        let overseer = Arc::clone(&overseer);
        tokio::spawn(async move {
            overseer
                .issue_task("deploy-1", "deployed", json!({}), Duration::from_secs(5))
                .await
        })
    };
    wait_for_pending(&overseer, "deploy-1").await;

    let second = overseer
        .issue_task("deploy-1", "deployed", json!({}), Duration::from_secs(5))
        .await;
    assert!(matches!(second, Err(OverseerError::TaskAlreadyPending(id)) if id == "deploy-1"));

    // The rejected call must not have unregistered the first task
    assert_eq!(overseer.pending_tasks(), vec!["deploy-1".to_string()]);
    let bytes = report("deploy-1", "deployed").to_bytes().unwrap();
    assert_eq!(overseer.handle_telemetry(&bytes), TelemetryOutcome::Resolved);
    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_second_matching_report_is_a_no_op() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);

    let issuer = {
        let overseer = Arc::clone(&overseer);
        tokio::spawn(async move {
            overseer
                .issue_task("deploy-1", "deployed", json!({}), Duration::from_secs(5))
                .await
        })
    };
    wait_for_pending(&overseer, "deploy-1").await;

    let bytes = report("deploy-1", "deployed").to_bytes().unwrap();
    assert_eq!(overseer.handle_telemetry(&bytes), TelemetryOutcome::Resolved);
    assert_eq!(overseer.handle_telemetry(&bytes), TelemetryOutcome::AlreadyResolved);

    issuer.await.unwrap().unwrap();
    assert_eq!(overseer.handle_telemetry(&bytes), TelemetryOutcome::Unmatched);
}

#[tokio::test]
async fn test_shutdown_releases_blocked_issuers() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);

    let issuer = {
        let overseer = Arc::clone(&overseer);
        tokio::spawn(async move {
            overseer
                .issue_task("deploy-1", "deployed", json!({}), Duration::from_secs(60))
                .await
        })
    };
    wait_for_pending(&overseer, "deploy-1").await;

    overseer.shutdown();
    let result = issuer.await.unwrap();
    assert!(matches!(result, Err(OverseerError::Shutdown)));
    assert!(overseer.pending_tasks().is_empty());
}

#[tokio::test]
async fn test_abandoned_issue_cleans_up_its_task() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);

    let issuer = {
        let overseer = Arc::clone(&overseer);
        tokio::spawn(async move {
            overseer
                .issue_task("deploy-1", "deployed", json!({}), Duration::from_secs(60))
                .await
        })
    };
    wait_for_pending(&overseer, "deploy-1").await;

    issuer.abort();
    let _ = issuer.await;
    assert!(overseer.pending_tasks().is_empty());
}

#[tokio::test]
async fn test_issue_after_shutdown_publishes_nothing() {
    let bus = MessageBus::new(64);
    let overseer = overseer(&bus);
    let mut commands = bus.subscribe(TOPIC_MISSION_TASK).unwrap();

    overseer.shutdown();
    let result = overseer
        .issue_task("deploy-1", "deployed", json!({}), Duration::from_secs(60))
        .await;

    assert!(matches!(result, Err(OverseerError::Shutdown)));
    assert!(overseer.pending_tasks().is_empty());
    let published = tokio::time::timeout(Duration::from_millis(50), commands.recv()).await;
    assert!(published.is_err(), "no command should reach the bus");
}
