//! Common test utilities for fdr-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use fdr_service::config::BatchConfig;
use fdr_service::error::FlowError;
use fdr_service::models::{
    Domain, FinalizedFlow, FlowKey, FlowPayload, NewStagingRecord, Payment, PaymentRequest,
    PromotionPlan, ReconciliationEntry, ReportedPayment, StagingRecord,
};
use fdr_service::services::{
    EventDeliveryError, EventManager, EventReporter, EventResponse, FlowEvent, FlowRepository,
    MemoryStore, NoopEventManager,
};
use fdr_service::workers::{BatchOrchestrator, BatchScheduler};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,fdr_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const BATCH_CODE: &str = "fdr-acquisition-test";

/// Fixed base instant so publication ordering is deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

pub fn at_minute(minute: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minute)
}

pub fn line(domain_code: &str, identifier: &str, data_index: i32, code: i32, amount: Decimal) -> ReportedPayment {
    ReportedPayment {
        domain_code: domain_code.to_string(),
        payment_identifier: identifier.to_string(),
        data_index,
        outcome_code: code,
        amount,
        receipt_identifier: None,
        payment_date: None,
    }
}

pub fn payload(lines: Vec<ReportedPayment>) -> FlowPayload {
    FlowPayload {
        declared_payment_count: None,
        declared_total_amount: None,
        payments: lines,
    }
}

pub fn staging(key: FlowKey, publication_time: DateTime<Utc>, payload: FlowPayload) -> NewStagingRecord {
    NewStagingRecord {
        key,
        publication_time,
        payload,
    }
}

/// Event manager that fails every delivery with an HTTP error.
pub struct RejectingEventManager;

#[async_trait]
impl EventManager for RejectingEventManager {
    async fn send(&self, _event: &FlowEvent) -> Result<EventResponse, EventDeliveryError> {
        Err(EventDeliveryError::Http {
            status: 503,
            body: b"event manager in maintenance".to_vec(),
        })
    }
}

/// Orchestrator over an in-memory store, with the event worker handle kept
/// so tests can wait for audits.
pub struct TestPipeline {
    pub store: Arc<MemoryStore>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub events: JoinHandle<()>,
}

impl TestPipeline {
    pub fn new(page_size: u32) -> Self {
        Self::with_event_manager(page_size, Arc::new(NoopEventManager))
    }

    pub fn with_event_manager(page_size: u32, manager: Arc<dyn EventManager>) -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let (reporter, events) = EventReporter::spawn(manager, store.clone(), 64);
        let orchestrator = Arc::new(BatchOrchestrator::new(store.clone(), reporter, page_size));

        Self {
            store,
            orchestrator,
            events,
        }
    }

    pub async fn stage(&self, record: NewStagingRecord) -> StagingRecord {
        self.store.stage(record).await.expect("Failed to stage flow")
    }

    pub fn scheduler(&self) -> BatchScheduler {
        let config = BatchConfig {
            batch_code: BATCH_CODE.to_string(),
            page_size: 10,
            ..Default::default()
        };
        BatchScheduler::new(
            self.orchestrator.clone(),
            self.store.clone(),
            config,
            CancellationToken::new(),
        )
    }

    /// Drop the orchestrator and wait until every queued event is audited.
    pub async fn drain_events(self) -> Arc<MemoryStore> {
        drop(self.orchestrator);
        self.events.await.expect("Event worker panicked");
        self.store
    }
}

/// Repository that holds the next page fetch until released, so a pass can
/// be kept in flight while the test acts.
pub struct GatedStore {
    inner: Arc<MemoryStore>,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Resolves once a pass is parked inside its page fetch.
    pub async fn wait_until_held(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl FlowRepository for GatedStore {
    async fn find_enabled_domains(&self) -> Result<Vec<Domain>, FlowError> {
        self.inner.find_enabled_domains().await
    }

    async fn find_domain(&self, domain_code: &str) -> Result<Option<Domain>, FlowError> {
        self.inner.find_domain(domain_code).await
    }

    async fn stage(&self, record: NewStagingRecord) -> Result<StagingRecord, FlowError> {
        self.inner.stage(record).await
    }

    async fn staged_exists(&self, key: &FlowKey) -> Result<bool, FlowError> {
        self.inner.staged_exists(key).await
    }

    async fn fetch_unprocessed(
        &self,
        page_size: u32,
        domain_code: Option<&str>,
    ) -> Result<Vec<StagingRecord>, FlowError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch_unprocessed(page_size, domain_code).await
    }

    async fn mark_processed(&self, staging_id: i64) -> Result<(), FlowError> {
        self.inner.mark_processed(staging_id).await
    }

    async fn delete_all_staging(&self) -> Result<u64, FlowError> {
        self.inner.delete_all_staging().await
    }

    async fn final_exists_in_domain(&self, key: &FlowKey) -> Result<bool, FlowError> {
        self.inner.final_exists_in_domain(key).await
    }

    async fn final_exists(
        &self,
        flow_code: &str,
        provider_code: &str,
        revision: i32,
    ) -> Result<bool, FlowError> {
        self.inner.final_exists(flow_code, provider_code, revision).await
    }

    async fn promote(&self, plan: PromotionPlan) -> Result<FinalizedFlow, FlowError> {
        self.inner.promote(plan).await
    }

    async fn find_finalized_flow(
        &self,
        flow_code: &str,
        provider_code: &str,
        revision: i32,
    ) -> Result<Option<FinalizedFlow>, FlowError> {
        self.inner
            .find_finalized_flow(flow_code, provider_code, revision)
            .await
    }

    async fn list_entries(&self, flow_id: Uuid) -> Result<Vec<ReconciliationEntry>, FlowError> {
        self.inner.list_entries(flow_id).await
    }

    async fn find_payment_request_by_request_identifier(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError> {
        self.inner
            .find_payment_request_by_request_identifier(domain_code, identifier)
            .await
    }

    async fn find_payment_request_by_payment_identifier(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError> {
        self.inner
            .find_payment_request_by_payment_identifier(domain_code, identifier)
            .await
    }

    async fn find_payment(
        &self,
        domain_code: &str,
        payment_identifier: &str,
        data_index: i32,
    ) -> Result<Option<Payment>, FlowError> {
        self.inner
            .find_payment(domain_code, payment_identifier, data_index)
            .await
    }
}

/// Pipeline whose first page fetch is held by a [`GatedStore`].
pub struct GatedPipeline {
    pub store: Arc<MemoryStore>,
    pub gate: Arc<GatedStore>,
    pub orchestrator: Arc<BatchOrchestrator>,
}

impl GatedPipeline {
    pub fn new(page_size: u32) -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let gate = Arc::new(GatedStore::new(store.clone()));
        let (reporter, _events) =
            EventReporter::spawn(Arc::new(NoopEventManager), store.clone(), 64);
        let orchestrator = Arc::new(BatchOrchestrator::new(gate.clone(), reporter, page_size));

        Self {
            store,
            gate,
            orchestrator,
        }
    }

    pub fn scheduler(&self) -> BatchScheduler {
        let config = BatchConfig {
            batch_code: BATCH_CODE.to_string(),
            page_size: 10,
            ..Default::default()
        };
        BatchScheduler::new(
            self.orchestrator.clone(),
            self.store.clone(),
            config,
            CancellationToken::new(),
        )
    }
}
