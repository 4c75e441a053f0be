use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use trigger_core::platform::{DEFAULT_FLOW_COMPONENT, Operation, PlatformCall, sample_trigger};
use trigger_core::{
    AuditLister, BatchOrchestrator, FailureKind, FatalError, FlowConfig, FlowConfigId,
    InMemoryPlatform, PlatformClient, PlatformError, ResetOutcome, RetryPolicy, TableDetail,
    TriggerReconciler, TriggerResolver, TriggerStatus,
};

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

fn flow(id: &str) -> FlowConfig {
    FlowConfig {
        id: FlowConfigId::parse(id).unwrap(),
        name: format!("Flow {id}"),
        is_disabled: false,
        configuration: json!({
            "trigger": {
                "runWithTokenId": 7,
                "coolDownPeriodMinutes": 10,
                "tableIds": ["in.c-crm.accounts"]
            }
        }),
    }
}

fn with_trigger(platform: &InMemoryPlatform, id: &str, trigger_id: &str) {
    platform.insert_flow(flow(id));
    let flow_id = FlowConfigId::parse(id).unwrap();
    platform.insert_trigger(sample_trigger(trigger_id, &flow_id, &["in.c-crm.accounts"]));
}

fn orchestrator(platform: &Arc<InMemoryPlatform>, cancel: CancellationToken) -> BatchOrchestrator {
    let client: Arc<dyn PlatformClient> = platform.clone();
    let resolver = TriggerResolver::new(client, quick_retry());
    BatchOrchestrator::new(
        TriggerReconciler::new(resolver, DEFAULT_FLOW_COMPONENT),
        cancel,
    )
}

#[tokio::test]
async fn one_failing_flow_does_not_stop_the_batch() -> Result<()> {
    let platform = Arc::new(InMemoryPlatform::new());
    for (id, trigger) in [("A", "tA"), ("B", "tB"), ("C", "tC")] {
        with_trigger(&platform, id, trigger);
    }
    platform.fail(
        Operation::CreateTrigger,
        Some("B"),
        PlatformError::Rejected {
            status: 400,
            reason: "invalid table".into(),
        },
        1,
    );

    let report = orchestrator(&platform, CancellationToken::new())
        .run(&["A", "B", "C"])
        .await?;

    let labels: Vec<_> = report
        .results
        .iter()
        .map(|result| (result.requested_id.as_str(), result.outcome.label()))
        .collect();
    assert_eq!(
        labels,
        vec![("A", "reset"), ("B", "failed"), ("C", "reset")]
    );
    let failure = report.results[1].outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Rejected);
    assert!(!report.is_success());
    assert_eq!(report.summary().failed, 1);

    // B lost its trigger: the delete went through before the create failed.
    assert!(platform.trigger("B").is_none());
    assert!(platform.trigger("A").is_some());
    assert!(platform.trigger("C").is_some());
    Ok(())
}

#[tokio::test]
async fn second_run_still_succeeds() -> Result<()> {
    let platform = Arc::new(InMemoryPlatform::new());
    platform.insert_flow(flow("42"));
    let batch = orchestrator(&platform, CancellationToken::new());

    let first = batch.run(&["42"]).await?;
    assert!(matches!(
        first.results[0].outcome,
        ResetOutcome::Created { .. }
    ));

    let second = batch.run(&["42"]).await?;
    assert!(second.is_success());
    let created = first.results[0].outcome.trigger().unwrap();
    match &second.results[0].outcome {
        ResetOutcome::Reset { previous, trigger } => {
            assert_eq!(previous, &created.id);
            assert_ne!(trigger.id, created.id);
        }
        other => panic!("expected reset, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn flow_without_trigger_creates_without_deleting() -> Result<()> {
    let platform = Arc::new(InMemoryPlatform::new());
    platform.insert_flow(flow("7"));

    let report = orchestrator(&platform, CancellationToken::new())
        .run(&["7"])
        .await?;

    assert!(report.is_success());
    assert_eq!(platform.count(Operation::DeleteTrigger), 0);
    assert_eq!(platform.count(Operation::CreateTrigger), 1);
    let trigger = platform.trigger("7").unwrap();
    assert_eq!(trigger.table_ids(), vec!["in.c-crm.accounts".to_string()]);
    assert_eq!(trigger.cool_down_period_minutes, Some(10));
    Ok(())
}

#[tokio::test]
async fn malformed_id_fails_without_mutating() -> Result<()> {
    let platform = Arc::new(InMemoryPlatform::new());
    with_trigger(&platform, "1", "t1");

    let report = orchestrator(&platform, CancellationToken::new())
        .run(&["not a flow!", "1"])
        .await?;

    assert_eq!(
        report.results[0].outcome.failure().map(|reason| reason.kind),
        Some(FailureKind::NotFound)
    );
    assert_eq!(report.results[1].outcome.label(), "reset");
    assert!(
        !platform
            .calls()
            .iter()
            .any(|call| matches!(call, PlatformCall::GetFlow { flow_id } if flow_id == "not a flow!"))
    );
    Ok(())
}

#[tokio::test]
async fn rejected_credential_aborts_the_batch() {
    let platform = Arc::new(InMemoryPlatform::new());
    with_trigger(&platform, "1", "t1");
    with_trigger(&platform, "2", "t2");
    platform.fail(
        Operation::GetFlow,
        None,
        PlatformError::Unauthorized {
            reason: "Invalid access token".into(),
        },
        1,
    );

    let err = orchestrator(&platform, CancellationToken::new())
        .run(&["1", "2"])
        .await
        .unwrap_err();

    assert!(matches!(err, FatalError::Unauthorized(_)));
    assert_eq!(platform.count(Operation::DeleteTrigger), 0);
    assert_eq!(platform.count(Operation::GetFlow), 1);
}

#[tokio::test]
async fn listing_drains_every_page() -> Result<()> {
    let platform = Arc::new(InMemoryPlatform::with_page_size(2));
    for id in ["1", "2", "3", "4", "5"] {
        platform.insert_flow(flow(id));
    }
    with_trigger(&platform, "3", "t3");
    platform.insert_table(TableDetail {
        id: "in.c-crm.accounts".into(),
        last_import_date: Some("2024-05-01T10:00:00+0200".into()),
    });

    let client: Arc<dyn PlatformClient> = platform.clone();
    let listing = AuditLister::new(client, quick_retry()).list().await?;

    assert!(listing.is_complete());
    assert_eq!(listing.rows.len(), 5);
    assert_eq!(platform.count(Operation::ListFlows), 3);
    let row = listing
        .rows
        .iter()
        .find(|row| row.flow_id.as_str() == "3")
        .unwrap();
    assert!(row.has_trigger);
    // sample triggers have never run
    assert_eq!(row.trigger_status, TriggerStatus::Pending);
    assert!(
        listing
            .rows
            .iter()
            .filter(|row| row.flow_id.as_str() != "3")
            .all(|row| row.trigger_status == TriggerStatus::None)
    );
    Ok(())
}

#[tokio::test]
async fn listing_marks_uninspectable_flows_unknown() -> Result<()> {
    let platform = Arc::new(InMemoryPlatform::new());
    with_trigger(&platform, "1", "t1");
    platform.insert_flow(flow("2"));
    platform.fail(
        Operation::GetTrigger,
        Some("1"),
        PlatformError::Transient {
            reason: "connection reset".into(),
        },
        10,
    );

    let client: Arc<dyn PlatformClient> = platform.clone();
    let listing = AuditLister::new(client, quick_retry()).list().await?;

    assert_eq!(listing.rows.len(), 2);
    assert_eq!(listing.rows[0].trigger_status, TriggerStatus::Unknown);
    assert_eq!(listing.rows[1].trigger_status, TriggerStatus::None);
    assert_eq!(listing.failures.len(), 1);
    assert_eq!(listing.failures[0].flow_id, "1");
    Ok(())
}
