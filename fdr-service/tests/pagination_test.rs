//! Paginated consumption of the staging store.

mod common;

use common::{at_minute, payload, staging, TestPipeline};
use fdr_service::models::FlowKey;
use fdr_service::workers::RunRequest;
use std::collections::HashSet;

#[tokio::test]
async fn every_row_is_visited_once_in_publication_order() {
    let pipeline = TestPipeline::new(3);
    pipeline.store.add_domain("A", true);

    // Staged out of publication order on purpose.
    let minutes = [7, 2, 9, 0, 5, 3, 8, 1];
    for (i, minute) in minutes.iter().enumerate() {
        pipeline
            .stage(staging(
                FlowKey::new("A", &format!("F{}", i), "P1", 1),
                at_minute(*minute),
                payload(vec![]),
            ))
            .await;
    }

    let mut passes = 0;
    loop {
        let report = pipeline.orchestrator.run_pass(RunRequest::scheduled()).await.unwrap();
        if report.fetched == 0 {
            break;
        }
        assert!(report.fetched <= 3);
        passes += 1;
        assert!(passes <= minutes.len(), "pagination did not terminate");
    }

    // 8 rows at 3 per page.
    assert_eq!(passes, 3);

    let flows = pipeline.store.finalized_flows();
    assert_eq!(flows.len(), minutes.len());

    let distinct: HashSet<_> = flows.iter().map(|f| f.flow_code.clone()).collect();
    assert_eq!(distinct.len(), minutes.len());

    // Promotion order follows publication time across page boundaries.
    let times: Vec<_> = flows.iter().map(|f| f.publication_time).collect();
    let mut sorted = times.clone();
    sorted.sort();
    assert_eq!(times, sorted);

    assert!(pipeline.store.staged_rows().iter().all(|r| r.processed));
}

#[tokio::test]
async fn equal_publication_times_are_all_consumed() {
    let pipeline = TestPipeline::new(2);
    pipeline.store.add_domain("A", true);

    for i in 0..5 {
        pipeline
            .stage(staging(
                FlowKey::new("A", &format!("F{}", i), "P1", 1),
                at_minute(0),
                payload(vec![]),
            ))
            .await;
    }

    let mut fetched = 0;
    for _ in 0..3 {
        fetched += pipeline
            .orchestrator
            .run_pass(RunRequest::scheduled())
            .await
            .unwrap()
            .fetched;
    }

    assert_eq!(fetched, 5);
    assert_eq!(pipeline.store.finalized_flows().len(), 5);
}

#[tokio::test]
async fn empty_store_returns_empty_page() {
    let pipeline = TestPipeline::new(10);

    let report = pipeline.orchestrator.run_pass(RunRequest::scheduled()).await.unwrap();

    assert_eq!(report.fetched, 0);
    assert!(!report.skipped);
}
