//! Flow events are audited for every delivery attempt and never block a pass.

mod common;

use common::{at_minute, line, payload, staging, RejectingEventManager, TestPipeline};
use fdr_service::models::FlowKey;
use fdr_service::services::{FlowEvent, FlowEventKind};
use fdr_service::workers::RunRequest;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn each_outcome_is_audited_as_delivered() {
    let pipeline = TestPipeline::new(10);
    pipeline.store.add_domain("A", true);
    pipeline.store.add_payment_request("A", "X", None);
    pipeline.store.add_payment("A", "X", 1, 0, dec!(10.00));

    pipeline
        .stage(staging(
            FlowKey::new("A", "F1", "P1", 1),
            at_minute(0),
            payload(vec![line("A", "X", 1, 0, dec!(10.00))]),
        ))
        .await;
    pipeline
        .stage(staging(FlowKey::new("A", "F2", "P1", 1), at_minute(1), payload(vec![])))
        .await;

    pipeline
        .orchestrator
        .run_pass(RunRequest::scheduled())
        .await
        .unwrap();

    let store = pipeline.drain_events().await;
    let audits = store.audit_records();

    assert_eq!(audits.len(), 2);
    assert!(audits.iter().all(|a| a.delivered));
    assert_eq!(audits[0].event_kind, FlowEventKind::FlowAccepted);
    assert_eq!(audits[1].event_kind, FlowEventKind::FlowAnomalous);

    let event: FlowEvent = serde_json::from_slice(&audits[1].event_payload).unwrap();
    assert_eq!(event.flow, FlowKey::new("A", "F2", "P1", 1));
    assert!(event.detail.unwrap().contains("Flow contains no payments"));
}

#[tokio::test]
async fn failed_delivery_is_audited_and_pass_still_succeeds() {
    let pipeline = TestPipeline::with_event_manager(10, Arc::new(RejectingEventManager));
    pipeline.store.add_domain("A", true);

    pipeline
        .stage(staging(FlowKey::new("A", "F1", "P1", 1), at_minute(0), payload(vec![])))
        .await;

    let report = pipeline
        .orchestrator
        .run_pass(RunRequest::scheduled())
        .await
        .unwrap();
    assert_eq!(report.anomalous, 1);
    assert_eq!(pipeline.store.finalized_flows().len(), 1);

    let store = pipeline.drain_events().await;
    let audits = store.audit_records();

    assert_eq!(audits.len(), 1);
    assert!(!audits[0].delivered);
    assert_eq!(audits[0].response, b"event manager in maintenance".to_vec());
}

#[tokio::test]
async fn duplicate_and_failure_events_are_reported() {
    let pipeline = TestPipeline::new(10);
    pipeline.store.add_domain("A", true);
    pipeline.store.add_domain("B", true);

    pipeline
        .stage(staging(FlowKey::new("A", "F1", "P1", 1), at_minute(0), payload(vec![])))
        .await;
    pipeline
        .stage(staging(FlowKey::new("B", "F1", "P1", 1), at_minute(1), payload(vec![])))
        .await;
    pipeline
        .stage(staging(FlowKey::new("A", "F9", "P1", 1), at_minute(2), payload(vec![])))
        .await;

    pipeline
        .orchestrator
        .run_pass(RunRequest::scheduled())
        .await
        .unwrap();
    pipeline.store.fail_next_promotions(1);
    pipeline
        .stage(staging(FlowKey::new("A", "F3", "P1", 1), at_minute(3), payload(vec![])))
        .await;
    pipeline
        .orchestrator
        .run_pass(RunRequest::scheduled())
        .await
        .unwrap();

    let store = pipeline.drain_events().await;
    let kinds: Vec<FlowEventKind> = store.audit_records().iter().map(|a| a.event_kind).collect();

    assert_eq!(
        kinds,
        vec![
            FlowEventKind::FlowAnomalous,
            FlowEventKind::DuplicateFlow,
            FlowEventKind::FlowAnomalous,
            FlowEventKind::PromotionFailed,
        ]
    );
}
