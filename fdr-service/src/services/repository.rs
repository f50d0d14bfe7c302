//! Store seams used by the pipeline.
//!
//! [`crate::services::Database`] is the PostgreSQL implementation;
//! [`crate::services::MemoryStore`] is the test double.

use crate::error::FlowError;
use crate::models::{
    BatchControl, Domain, FinalizedFlow, FlowKey, NewStagingRecord, Payment, PaymentRequest,
    PromotionPlan, ReconciliationEntry, StagingRecord,
};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait FlowRepository: Send + Sync {
    // Domain registry
    async fn find_enabled_domains(&self) -> Result<Vec<Domain>, FlowError>;
    async fn find_domain(&self, domain_code: &str) -> Result<Option<Domain>, FlowError>;

    // Staging store

    /// Insert with `processed = false`. A key collision yields
    /// [`FlowError::DuplicateFlow`] and leaves the existing row untouched.
    async fn stage(&self, record: NewStagingRecord) -> Result<StagingRecord, FlowError>;
    async fn staged_exists(&self, key: &FlowKey) -> Result<bool, FlowError>;
    /// Oldest-first page of unprocessed rows, optionally for one domain.
    async fn fetch_unprocessed(
        &self,
        page_size: u32,
        domain_code: Option<&str>,
    ) -> Result<Vec<StagingRecord>, FlowError>;
    async fn mark_processed(&self, staging_id: i64) -> Result<(), FlowError>;
    async fn delete_all_staging(&self) -> Result<u64, FlowError>;

    // Flow ledger
    async fn final_exists_in_domain(&self, key: &FlowKey) -> Result<bool, FlowError>;
    async fn final_exists(
        &self,
        flow_code: &str,
        provider_code: &str,
        revision: i32,
    ) -> Result<bool, FlowError>;
    /// Write the ledger row, every entry and the staging `processed` flip
    /// atomically.
    async fn promote(&self, plan: PromotionPlan) -> Result<FinalizedFlow, FlowError>;
    async fn find_finalized_flow(
        &self,
        flow_code: &str,
        provider_code: &str,
        revision: i32,
    ) -> Result<Option<FinalizedFlow>, FlowError>;
    async fn list_entries(&self, flow_id: Uuid) -> Result<Vec<ReconciliationEntry>, FlowError>;

    // Payment-request and payment indexes
    async fn find_payment_request_by_request_identifier(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError>;
    async fn find_payment_request_by_payment_identifier(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError>;
    async fn find_payment(
        &self,
        domain_code: &str,
        payment_identifier: &str,
        data_index: i32,
    ) -> Result<Option<Payment>, FlowError>;
}

/// Source of operator-requested batch runs.
#[async_trait]
pub trait BatchControlSource: Send + Sync {
    async fn find_batch_control(&self, batch_code: &str)
        -> Result<Option<BatchControl>, FlowError>;
    /// Consume a pending request.
    async fn clear_batch_request(&self, batch_code: &str) -> Result<(), FlowError>;
    /// Put a consumed request back. A request raised in the meantime wins.
    async fn restore_batch_request(
        &self,
        batch_code: &str,
        domain_code: Option<&str>,
    ) -> Result<(), FlowError>;
}
