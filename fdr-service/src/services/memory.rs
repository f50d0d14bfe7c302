//! In-memory store implementing every store seam. Test double only; the
//! service always runs on [`crate::services::Database`].
//!
//! A single mutex guards all state, so [`FlowRepository::promote`] is atomic
//! the same way the PostgreSQL transaction is.

use crate::error::FlowError;
use crate::models::{
    BatchControl, Domain, FinalizedFlow, FlowKey, NewStagingRecord, Payment, PaymentRequest,
    PromotionPlan, ReconciliationEntry, StagingRecord,
};
use crate::services::events::{AuditRecord, AuditSink};
use crate::services::repository::{BatchControlSource, FlowRepository};
use async_trait::async_trait;
use chrono::Utc;
use fdr_core::error::AppError;
use rust_decimal::Decimal;
use sqlx::types::Json;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    domains: Vec<Domain>,
    staging: Vec<StagingRecord>,
    next_staging_id: i64,
    flows: Vec<FinalizedFlow>,
    entries: Vec<ReconciliationEntry>,
    payment_requests: Vec<PaymentRequest>,
    payments: Vec<Payment>,
    batch_controls: Vec<BatchControl>,
    audit: Vec<AuditRecord>,
    failing_promotions: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock can only come from a test assertion.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn add_domain(&self, domain_code: &str, enabled: bool) {
        self.lock().domains.push(Domain {
            domain_code: domain_code.to_string(),
            description: None,
            enabled,
        });
    }

    pub fn add_payment_request(
        &self,
        domain_code: &str,
        request_identifier: &str,
        payment_identifier: Option<&str>,
    ) -> Uuid {
        let payment_request_id = Uuid::new_v4();
        self.lock().payment_requests.push(PaymentRequest {
            payment_request_id,
            domain_code: domain_code.to_string(),
            request_identifier: request_identifier.to_string(),
            payment_identifier: payment_identifier.map(str::to_string),
        });
        payment_request_id
    }

    pub fn add_payment(
        &self,
        domain_code: &str,
        payment_identifier: &str,
        data_index: i32,
        outcome_code: i32,
        amount: Decimal,
    ) -> Uuid {
        let payment_id = Uuid::new_v4();
        self.lock().payments.push(Payment {
            payment_id,
            domain_code: domain_code.to_string(),
            payment_identifier: payment_identifier.to_string(),
            data_index,
            outcome_code,
            amount,
        });
        payment_id
    }

    pub fn request_batch(&self, batch_code: &str, domain_code: Option<&str>) {
        let mut state = self.lock();
        state.batch_controls.retain(|c| c.batch_code != batch_code);
        state.batch_controls.push(BatchControl {
            batch_code: batch_code.to_string(),
            requested: true,
            domain_code: domain_code.map(str::to_string),
            updated_utc: Utc::now(),
        });
    }

    /// Make the next `count` promotions fail as a storage error would.
    pub fn fail_next_promotions(&self, count: usize) {
        self.lock().failing_promotions = count;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn staged_rows(&self) -> Vec<StagingRecord> {
        self.lock().staging.clone()
    }

    pub fn finalized_flows(&self) -> Vec<FinalizedFlow> {
        self.lock().flows.clone()
    }

    pub fn all_entries(&self) -> Vec<ReconciliationEntry> {
        self.lock().entries.clone()
    }

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.lock().audit.clone()
    }

    pub fn batch_control(&self, batch_code: &str) -> Option<BatchControl> {
        self.lock()
            .batch_controls
            .iter()
            .find(|c| c.batch_code == batch_code)
            .cloned()
    }
}

fn same_flow(flow: &FinalizedFlow, flow_code: &str, provider_code: &str, revision: i32) -> bool {
    flow.flow_code == flow_code && flow.provider_code == provider_code && flow.revision == revision
}

#[async_trait]
impl FlowRepository for MemoryStore {
    async fn find_enabled_domains(&self) -> Result<Vec<Domain>, FlowError> {
        let mut domains: Vec<Domain> = self
            .lock()
            .domains
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .collect();
        domains.sort_by(|a, b| a.domain_code.cmp(&b.domain_code));
        Ok(domains)
    }

    async fn find_domain(&self, domain_code: &str) -> Result<Option<Domain>, FlowError> {
        Ok(self
            .lock()
            .domains
            .iter()
            .find(|d| d.domain_code == domain_code)
            .cloned())
    }

    async fn stage(&self, record: NewStagingRecord) -> Result<StagingRecord, FlowError> {
        let mut state = self.lock();
        if state.staging.iter().any(|r| r.key() == record.key) {
            return Err(FlowError::DuplicateFlow(record.key));
        }

        state.next_staging_id += 1;
        let staged = StagingRecord {
            staging_id: state.next_staging_id,
            domain_code: record.key.domain_code,
            flow_code: record.key.flow_code,
            provider_code: record.key.provider_code,
            revision: record.key.revision,
            publication_time: record.publication_time,
            processed: false,
            payload: Json(record.payload),
            created_utc: Utc::now(),
        };
        state.staging.push(staged.clone());
        Ok(staged)
    }

    async fn staged_exists(&self, key: &FlowKey) -> Result<bool, FlowError> {
        Ok(self.lock().staging.iter().any(|r| &r.key() == key))
    }

    async fn fetch_unprocessed(
        &self,
        page_size: u32,
        domain_code: Option<&str>,
    ) -> Result<Vec<StagingRecord>, FlowError> {
        let mut rows: Vec<StagingRecord> = self
            .lock()
            .staging
            .iter()
            .filter(|r| !r.processed)
            .filter(|r| domain_code.is_none_or(|code| r.domain_code == code))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.publication_time
                .cmp(&b.publication_time)
                .then(a.staging_id.cmp(&b.staging_id))
        });
        rows.truncate(page_size.max(1) as usize);
        Ok(rows)
    }

    async fn mark_processed(&self, staging_id: i64) -> Result<(), FlowError> {
        if let Some(row) = self
            .lock()
            .staging
            .iter_mut()
            .find(|r| r.staging_id == staging_id)
        {
            row.processed = true;
        }
        Ok(())
    }

    async fn delete_all_staging(&self) -> Result<u64, FlowError> {
        let mut state = self.lock();
        let deleted = state.staging.len() as u64;
        state.staging.clear();
        Ok(deleted)
    }

    async fn final_exists_in_domain(&self, key: &FlowKey) -> Result<bool, FlowError> {
        Ok(self.lock().flows.iter().any(|f| &f.key() == key))
    }

    async fn final_exists(
        &self,
        flow_code: &str,
        provider_code: &str,
        revision: i32,
    ) -> Result<bool, FlowError> {
        Ok(self
            .lock()
            .flows
            .iter()
            .any(|f| same_flow(f, flow_code, provider_code, revision)))
    }

    async fn promote(&self, plan: PromotionPlan) -> Result<FinalizedFlow, FlowError> {
        let mut state = self.lock();

        if state.failing_promotions > 0 {
            state.failing_promotions -= 1;
            return Err(FlowError::Store(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to commit promotion: simulated failure"
            ))));
        }

        let key = plan.flow.key;
        if state
            .flows
            .iter()
            .any(|f| same_flow(f, &key.flow_code, &key.provider_code, key.revision))
        {
            return Err(FlowError::DuplicateFlow(key));
        }

        let now = Utc::now();
        let flow = FinalizedFlow {
            flow_id: plan.flow.flow_id,
            domain_code: key.domain_code,
            flow_code: key.flow_code,
            provider_code: key.provider_code,
            revision: key.revision,
            publication_time: plan.flow.publication_time,
            status: plan.flow.status.as_str().to_string(),
            payment_count: plan.flow.payment_count,
            total_amount: plan.flow.total_amount,
            anomalies: Json(plan.flow.anomalies),
            created_utc: now,
        };

        let entries = plan.entries.into_iter().map(|entry| ReconciliationEntry {
            entry_id: Uuid::new_v4(),
            flow_id: flow.flow_id,
            domain_code: entry.domain_code,
            payment_identifier: entry.payment_identifier,
            data_index: entry.data_index,
            outcome_code: entry.outcome_code,
            amount: entry.amount,
            status: entry.status.as_str().to_string(),
            payment_request_id: entry.payment_request_id,
            payment_id: entry.payment_id,
            anomalies: Json(entry.anomalies),
            created_utc: now,
        });
        let entries: Vec<ReconciliationEntry> = entries.collect();

        state.entries.extend(entries);
        state.flows.push(flow.clone());
        if let Some(row) = state
            .staging
            .iter_mut()
            .find(|r| r.staging_id == plan.staging_id)
        {
            row.processed = true;
        }

        Ok(flow)
    }

    async fn find_finalized_flow(
        &self,
        flow_code: &str,
        provider_code: &str,
        revision: i32,
    ) -> Result<Option<FinalizedFlow>, FlowError> {
        Ok(self
            .lock()
            .flows
            .iter()
            .find(|f| same_flow(f, flow_code, provider_code, revision))
            .cloned())
    }

    async fn list_entries(&self, flow_id: Uuid) -> Result<Vec<ReconciliationEntry>, FlowError> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn find_payment_request_by_request_identifier(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError> {
        Ok(self
            .lock()
            .payment_requests
            .iter()
            .find(|r| r.domain_code == domain_code && r.request_identifier == identifier)
            .cloned())
    }

    async fn find_payment_request_by_payment_identifier(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError> {
        Ok(self
            .lock()
            .payment_requests
            .iter()
            .find(|r| {
                r.domain_code == domain_code && r.payment_identifier.as_deref() == Some(identifier)
            })
            .cloned())
    }

    async fn find_payment(
        &self,
        domain_code: &str,
        payment_identifier: &str,
        data_index: i32,
    ) -> Result<Option<Payment>, FlowError> {
        Ok(self
            .lock()
            .payments
            .iter()
            .find(|p| {
                p.domain_code == domain_code
                    && p.payment_identifier == payment_identifier
                    && p.data_index == data_index
            })
            .cloned())
    }
}

#[async_trait]
impl BatchControlSource for MemoryStore {
    async fn find_batch_control(
        &self,
        batch_code: &str,
    ) -> Result<Option<BatchControl>, FlowError> {
        Ok(self.batch_control(batch_code))
    }

    async fn clear_batch_request(&self, batch_code: &str) -> Result<(), FlowError> {
        if let Some(control) = self
            .lock()
            .batch_controls
            .iter_mut()
            .find(|c| c.batch_code == batch_code)
        {
            control.requested = false;
            control.domain_code = None;
            control.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn restore_batch_request(
        &self,
        batch_code: &str,
        domain_code: Option<&str>,
    ) -> Result<(), FlowError> {
        if let Some(control) = self
            .lock()
            .batch_controls
            .iter_mut()
            .find(|c| c.batch_code == batch_code && !c.requested)
        {
            control.requested = true;
            control.domain_code = domain_code.map(str::to_string);
            control.updated_utc = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record(&self, record: AuditRecord) -> Result<(), AppError> {
        self.lock().audit.push(record);
        Ok(())
    }
}
