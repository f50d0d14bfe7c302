//! Batch passes over the staging store: deduplication, promotion and event
//! reporting for one page at a time.

use crate::error::FlowError;
use crate::models::{FlowStatus, StagingRecord};
use crate::services::events::{EventReporter, FlowEvent, FlowEventKind};
use crate::services::metrics::{record_batch_pass, record_flow_outcome};
use crate::services::promotion::{DomainState, FlowPromoter};
use crate::services::repository::FlowRepository;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// How a pass was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

/// Explicit "run now" signal handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub trigger: TriggerKind,
    pub domain_code: Option<String>,
}

impl RunRequest {
    pub fn scheduled() -> Self {
        Self {
            trigger: TriggerKind::Scheduled,
            domain_code: None,
        }
    }

    pub fn manual(domain_code: Option<String>) -> Self {
        Self {
            trigger: TriggerKind::Manual,
            domain_code,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub domain_code: Option<String>,
    pub fetched: usize,
    pub accepted: usize,
    pub anomalous: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Another pass was already in flight.
    pub skipped: bool,
}

enum RecordOutcome {
    Promoted(FlowStatus),
    Duplicate,
    Failed,
}

pub struct BatchOrchestrator {
    repo: Arc<dyn FlowRepository>,
    promoter: FlowPromoter,
    reporter: EventReporter,
    page_size: u32,
    in_flight: Mutex<()>,
}

impl BatchOrchestrator {
    pub fn new(repo: Arc<dyn FlowRepository>, reporter: EventReporter, page_size: u32) -> Self {
        Self {
            promoter: FlowPromoter::new(repo.clone()),
            repo,
            reporter,
            page_size: page_size.max(1),
            in_flight: Mutex::new(()),
        }
    }

    /// Process at most one page of unprocessed staging rows.
    ///
    /// Only one pass runs at a time process-wide; a request arriving while
    /// one is in flight returns a report with `skipped` set.
    pub async fn run_pass(&self, request: RunRequest) -> Result<PassReport, FlowError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::info!(
                trigger = request.trigger.as_str(),
                "Batch pass already in flight, skipping"
            );
            record_batch_pass(request.trigger.as_str(), "skipped", 0.0);
            return Ok(PassReport {
                domain_code: request.domain_code,
                skipped: true,
                ..Default::default()
            });
        };

        let start = Instant::now();
        let result = self.run_page(&request).await;
        let label = if result.is_ok() { "completed" } else { "error" };
        record_batch_pass(
            request.trigger.as_str(),
            label,
            start.elapsed().as_secs_f64(),
        );

        match &result {
            Ok(report) => tracing::info!(
                trigger = request.trigger.as_str(),
                domain_code = ?report.domain_code,
                fetched = report.fetched,
                accepted = report.accepted,
                anomalous = report.anomalous,
                duplicates = report.duplicates,
                failed = report.failed,
                duration_ms = start.elapsed().as_millis(),
                "Batch pass finished"
            ),
            Err(e) => tracing::error!(
                trigger = request.trigger.as_str(),
                error = %e,
                "Batch pass aborted"
            ),
        }

        result
    }

    /// Delete every staging row, processed or not. Operational recovery only.
    pub async fn reset_staging(&self) -> Result<u64, FlowError> {
        let _guard = self.in_flight.lock().await;
        let deleted = self.repo.delete_all_staging().await?;
        tracing::warn!(deleted = deleted, "Staging store purged");
        Ok(deleted)
    }

    async fn run_page(&self, request: &RunRequest) -> Result<PassReport, FlowError> {
        if let Some(code) = &request.domain_code {
            if self.repo.find_domain(code).await?.is_none() {
                return Err(FlowError::UnknownDomain(code.clone()));
            }
        }

        let enabled: HashSet<String> = self
            .repo
            .find_enabled_domains()
            .await?
            .into_iter()
            .map(|d| d.domain_code)
            .collect();

        let rows = self
            .repo
            .fetch_unprocessed(self.page_size, request.domain_code.as_deref())
            .await?;

        let mut report = PassReport {
            domain_code: request.domain_code.clone(),
            fetched: rows.len(),
            ..Default::default()
        };

        for row in &rows {
            match self.process_record(row, &enabled).await {
                RecordOutcome::Promoted(FlowStatus::Accepted) => report.accepted += 1,
                RecordOutcome::Promoted(FlowStatus::Anomalous) => report.anomalous += 1,
                RecordOutcome::Duplicate => report.duplicates += 1,
                RecordOutcome::Failed => report.failed += 1,
            }
        }

        Ok(report)
    }

    async fn domain_state(
        &self,
        domain_code: &str,
        enabled: &HashSet<String>,
    ) -> Result<DomainState, FlowError> {
        if enabled.contains(domain_code) {
            return Ok(DomainState::Enabled);
        }
        Ok(match self.repo.find_domain(domain_code).await? {
            Some(_) => DomainState::Disabled,
            None => DomainState::Unregistered,
        })
    }

    async fn is_already_final(&self, row: &StagingRecord) -> Result<bool, FlowError> {
        let key = row.key();
        if self.repo.final_exists_in_domain(&key).await? {
            return Ok(true);
        }
        self.repo
            .final_exists(&key.flow_code, &key.provider_code, key.revision)
            .await
    }

    async fn process_record(&self, row: &StagingRecord, enabled: &HashSet<String>) -> RecordOutcome {
        let key = row.key();

        match self.is_already_final(row).await {
            Ok(true) => return self.reject_duplicate(row).await,
            Ok(false) => {}
            Err(e) => return self.promotion_failed(row, e),
        }

        let domain = match self.domain_state(&row.domain_code, enabled).await {
            Ok(domain) => domain,
            Err(e) => return self.promotion_failed(row, e),
        };

        match self.promoter.promote(row, domain).await {
            Ok(flow) => {
                let status = flow.status();
                record_flow_outcome(status.as_str());

                let (kind, detail) = match status {
                    FlowStatus::Accepted => (FlowEventKind::FlowAccepted, None),
                    FlowStatus::Anomalous => {
                        (FlowEventKind::FlowAnomalous, Some(flow.anomalies.0.join("; ")))
                    }
                };
                self.reporter.report(FlowEvent::new(kind, key, detail));
                RecordOutcome::Promoted(status)
            }
            Err(FlowError::DuplicateFlow(_)) => self.reject_duplicate(row).await,
            Err(e) => self.promotion_failed(row, e),
        }
    }

    async fn reject_duplicate(&self, row: &StagingRecord) -> RecordOutcome {
        let key = row.key();
        tracing::info!(flow = %key, "Flow already finalized, rejecting duplicate");

        if let Err(e) = self.repo.mark_processed(row.staging_id).await {
            // Left unprocessed, the row is rejected again on the next pass.
            tracing::warn!(flow = %key, error = %e, "Failed to mark duplicate processed");
        }

        record_flow_outcome("duplicate");
        self.reporter
            .report(FlowEvent::new(FlowEventKind::DuplicateFlow, key, None));
        RecordOutcome::Duplicate
    }

    fn promotion_failed(&self, row: &StagingRecord, err: FlowError) -> RecordOutcome {
        let key = row.key();
        tracing::error!(flow = %key, error = %err, "Promotion failed, row left for retry");

        record_flow_outcome("failed");
        self.reporter.report(FlowEvent::new(
            FlowEventKind::PromotionFailed,
            key,
            Some(err.to_string()),
        ));
        RecordOutcome::Failed
    }
}
