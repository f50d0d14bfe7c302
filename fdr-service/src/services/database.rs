//! PostgreSQL store for fdr-service.

use crate::error::FlowError;
use crate::models::{
    BatchControl, Domain, FinalizedFlow, FlowKey, NewStagingRecord, Payment, PaymentRequest,
    PromotionPlan, ReconciliationEntry, StagingRecord,
};
use crate::services::events::{AuditRecord, AuditSink};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{BatchControlSource, FlowRepository};
use async_trait::async_trait;
use fdr_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const STAGING_COLUMNS: &str = "staging_id, domain_code, flow_code, provider_code, revision, publication_time, processed, payload, created_utc";
const FLOW_COLUMNS: &str = "flow_id, domain_code, flow_code, provider_code, revision, publication_time, status, payment_count, total_amount, anomalies, created_utc";
const ENTRY_COLUMNS: &str = "entry_id, flow_id, domain_code, payment_identifier, data_index, outcome_code, amount, status, payment_request_id, payment_id, anomalies, created_utc";
const PAYMENT_REQUEST_COLUMNS: &str =
    "payment_request_id, domain_code, request_identifier, payment_identifier";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "fdr-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl FlowRepository for Database {
    // =========================================================================
    // Domain Registry Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn find_enabled_domains(&self) -> Result<Vec<Domain>, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_enabled_domains"])
            .start_timer();

        let domains = sqlx::query_as::<_, Domain>(
            r#"
            SELECT domain_code, description, enabled
            FROM domains
            WHERE enabled = TRUE
            ORDER BY domain_code
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to list enabled domains", e))?;

        timer.observe_duration();
        Ok(domains)
    }

    #[instrument(skip(self))]
    async fn find_domain(&self, domain_code: &str) -> Result<Option<Domain>, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_domain"])
            .start_timer();

        let domain = sqlx::query_as::<_, Domain>(
            r#"
            SELECT domain_code, description, enabled
            FROM domains
            WHERE domain_code = $1
            "#,
        )
        .bind(domain_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to get domain", e))?;

        timer.observe_duration();
        Ok(domain)
    }

    // =========================================================================
    // Staging Operations
    // =========================================================================

    #[instrument(skip(self, record), fields(flow = %record.key))]
    async fn stage(&self, record: NewStagingRecord) -> Result<StagingRecord, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["stage"])
            .start_timer();

        let staged = sqlx::query_as::<_, StagingRecord>(&format!(
            r#"
            INSERT INTO staged_flows (domain_code, flow_code, provider_code, revision, publication_time, processed, payload)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            ON CONFLICT (domain_code, flow_code, provider_code, revision) DO NOTHING
            RETURNING {}
            "#,
            STAGING_COLUMNS
        ))
        .bind(&record.key.domain_code)
        .bind(&record.key.flow_code)
        .bind(&record.key.provider_code)
        .bind(record.key.revision)
        .bind(record.publication_time)
        .bind(Json(&record.payload))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to stage flow", e))?;

        timer.observe_duration();

        match staged {
            Some(staged) => {
                info!(staging_id = staged.staging_id, "Flow staged");
                Ok(staged)
            }
            None => Err(FlowError::DuplicateFlow(record.key)),
        }
    }

    #[instrument(skip(self), fields(flow = %key))]
    async fn staged_exists(&self, key: &FlowKey) -> Result<bool, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["staged_exists"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM staged_flows
                WHERE domain_code = $1 AND flow_code = $2 AND provider_code = $3 AND revision = $4
            )
            "#,
        )
        .bind(&key.domain_code)
        .bind(&key.flow_code)
        .bind(&key.provider_code)
        .bind(key.revision)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to check staged flow", e))?;

        timer.observe_duration();
        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn fetch_unprocessed(
        &self,
        page_size: u32,
        domain_code: Option<&str>,
    ) -> Result<Vec<StagingRecord>, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fetch_unprocessed"])
            .start_timer();

        let limit = i64::from(page_size.max(1));

        let rows = if let Some(domain_code) = domain_code {
            sqlx::query_as::<_, StagingRecord>(&format!(
                r#"
                SELECT {}
                FROM staged_flows
                WHERE processed = FALSE AND domain_code = $1
                ORDER BY publication_time, staging_id
                LIMIT $2
                "#,
                STAGING_COLUMNS
            ))
            .bind(domain_code)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, StagingRecord>(&format!(
                r#"
                SELECT {}
                FROM staged_flows
                WHERE processed = FALSE
                ORDER BY publication_time, staging_id
                LIMIT $1
                "#,
                STAGING_COLUMNS
            ))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| FlowError::database("Failed to fetch staged flows", e))?;

        timer.observe_duration();
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn mark_processed(&self, staging_id: i64) -> Result<(), FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_processed"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE staged_flows
            SET processed = TRUE
            WHERE staging_id = $1 AND processed = FALSE
            "#,
        )
        .bind(staging_id)
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to mark staged flow processed", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_all_staging(&self) -> Result<u64, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_all_staging"])
            .start_timer();

        let result = sqlx::query("DELETE FROM staged_flows")
            .execute(&self.pool)
            .await
            .map_err(|e| FlowError::database("Failed to reset staging", e))?;

        timer.observe_duration();
        warn!(deleted = result.rows_affected(), "Staging store reset");

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Flow Ledger Operations
    // =========================================================================

    #[instrument(skip(self), fields(flow = %key))]
    async fn final_exists_in_domain(&self, key: &FlowKey) -> Result<bool, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["final_exists_in_domain"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM finalized_flows
                WHERE domain_code = $1 AND flow_code = $2 AND provider_code = $3 AND revision = $4
            )
            "#,
        )
        .bind(&key.domain_code)
        .bind(&key.flow_code)
        .bind(&key.provider_code)
        .bind(key.revision)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to check finalized flow", e))?;

        timer.observe_duration();
        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn final_exists(
        &self,
        flow_code: &str,
        provider_code: &str,
        revision: i32,
    ) -> Result<bool, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["final_exists"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM finalized_flows
                WHERE flow_code = $1 AND provider_code = $2 AND revision = $3
            )
            "#,
        )
        .bind(flow_code)
        .bind(provider_code)
        .bind(revision)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to check finalized flow", e))?;

        timer.observe_duration();
        Ok(exists)
    }

    #[instrument(skip(self, plan), fields(flow = %plan.flow.key, entries = plan.entries.len()))]
    async fn promote(&self, plan: PromotionPlan) -> Result<FinalizedFlow, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["promote"])
            .start_timer();

        // Dropping the transaction on any early return rolls everything back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FlowError::database("Failed to begin promotion", e))?;

        let key = &plan.flow.key;
        let flow = sqlx::query_as::<_, FinalizedFlow>(&format!(
            r#"
            INSERT INTO finalized_flows (flow_id, domain_code, flow_code, provider_code, revision, publication_time, status, payment_count, total_amount, anomalies)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            FLOW_COLUMNS
        ))
        .bind(plan.flow.flow_id)
        .bind(&key.domain_code)
        .bind(&key.flow_code)
        .bind(&key.provider_code)
        .bind(key.revision)
        .bind(plan.flow.publication_time)
        .bind(plan.flow.status.as_str())
        .bind(plan.flow.payment_count)
        .bind(plan.flow.total_amount)
        .bind(Json(&plan.flow.anomalies))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                FlowError::DuplicateFlow(key.clone())
            } else {
                FlowError::database("Failed to insert finalized flow", e)
            }
        })?;

        for entry in &plan.entries {
            sqlx::query(
                r#"
                INSERT INTO reconciliation_entries (entry_id, flow_id, domain_code, payment_identifier, data_index, outcome_code, amount, status, payment_request_id, payment_id, anomalies)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(flow.flow_id)
            .bind(&entry.domain_code)
            .bind(&entry.payment_identifier)
            .bind(entry.data_index)
            .bind(entry.outcome_code)
            .bind(entry.amount)
            .bind(entry.status.as_str())
            .bind(entry.payment_request_id)
            .bind(entry.payment_id)
            .bind(Json(&entry.anomalies))
            .execute(&mut *tx)
            .await
            .map_err(|e| FlowError::database("Failed to insert reconciliation entry", e))?;
        }

        sqlx::query(
            r#"
            UPDATE staged_flows
            SET processed = TRUE
            WHERE staging_id = $1
            "#,
        )
        .bind(plan.staging_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| FlowError::database("Failed to mark staged flow processed", e))?;

        tx.commit()
            .await
            .map_err(|e| FlowError::database("Failed to commit promotion", e))?;

        timer.observe_duration();
        Ok(flow)
    }

    #[instrument(skip(self))]
    async fn find_finalized_flow(
        &self,
        flow_code: &str,
        provider_code: &str,
        revision: i32,
    ) -> Result<Option<FinalizedFlow>, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_finalized_flow"])
            .start_timer();

        let flow = sqlx::query_as::<_, FinalizedFlow>(&format!(
            r#"
            SELECT {}
            FROM finalized_flows
            WHERE flow_code = $1 AND provider_code = $2 AND revision = $3
            "#,
            FLOW_COLUMNS
        ))
        .bind(flow_code)
        .bind(provider_code)
        .bind(revision)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to get finalized flow", e))?;

        timer.observe_duration();
        Ok(flow)
    }

    #[instrument(skip(self))]
    async fn list_entries(&self, flow_id: Uuid) -> Result<Vec<ReconciliationEntry>, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_entries"])
            .start_timer();

        let entries = sqlx::query_as::<_, ReconciliationEntry>(&format!(
            r#"
            SELECT {}
            FROM reconciliation_entries
            WHERE flow_id = $1
            ORDER BY created_utc, payment_identifier, data_index
            "#,
            ENTRY_COLUMNS
        ))
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to list reconciliation entries", e))?;

        timer.observe_duration();
        Ok(entries)
    }

    // =========================================================================
    // Payment Request / Payment Lookups
    // =========================================================================

    #[instrument(skip(self))]
    async fn find_payment_request_by_request_identifier(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_request_by_request_identifier"])
            .start_timer();

        let request = sqlx::query_as::<_, PaymentRequest>(&format!(
            r#"
            SELECT {}
            FROM payment_requests
            WHERE domain_code = $1 AND request_identifier = $2
            ORDER BY payment_request_id
            LIMIT 1
            "#,
            PAYMENT_REQUEST_COLUMNS
        ))
        .bind(domain_code)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to find payment request", e))?;

        timer.observe_duration();
        Ok(request)
    }

    #[instrument(skip(self))]
    async fn find_payment_request_by_payment_identifier(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_request_by_payment_identifier"])
            .start_timer();

        let request = sqlx::query_as::<_, PaymentRequest>(&format!(
            r#"
            SELECT {}
            FROM payment_requests
            WHERE domain_code = $1 AND payment_identifier = $2
            ORDER BY payment_request_id
            LIMIT 1
            "#,
            PAYMENT_REQUEST_COLUMNS
        ))
        .bind(domain_code)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to find payment request", e))?;

        timer.observe_duration();
        Ok(request)
    }

    #[instrument(skip(self))]
    async fn find_payment(
        &self,
        domain_code: &str,
        payment_identifier: &str,
        data_index: i32,
    ) -> Result<Option<Payment>, FlowError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, domain_code, payment_identifier, data_index, outcome_code, amount
            FROM payments
            WHERE domain_code = $1 AND payment_identifier = $2 AND data_index = $3
            "#,
        )
        .bind(domain_code)
        .bind(payment_identifier)
        .bind(data_index)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to find payment", e))?;

        timer.observe_duration();
        Ok(payment)
    }
}

#[async_trait]
impl BatchControlSource for Database {
    #[instrument(skip(self))]
    async fn find_batch_control(
        &self,
        batch_code: &str,
    ) -> Result<Option<BatchControl>, FlowError> {
        let control = sqlx::query_as::<_, BatchControl>(
            r#"
            SELECT batch_code, requested, domain_code, updated_utc
            FROM batch_controls
            WHERE batch_code = $1
            "#,
        )
        .bind(batch_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to get batch control", e))?;

        Ok(control)
    }

    #[instrument(skip(self))]
    async fn clear_batch_request(&self, batch_code: &str) -> Result<(), FlowError> {
        sqlx::query(
            r#"
            UPDATE batch_controls
            SET requested = FALSE, domain_code = NULL, updated_utc = NOW()
            WHERE batch_code = $1
            "#,
        )
        .bind(batch_code)
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to clear batch request", e))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn restore_batch_request(
        &self,
        batch_code: &str,
        domain_code: Option<&str>,
    ) -> Result<(), FlowError> {
        sqlx::query(
            r#"
            UPDATE batch_controls
            SET requested = TRUE, domain_code = $2, updated_utc = NOW()
            WHERE batch_code = $1 AND requested = FALSE
            "#,
        )
        .bind(batch_code)
        .bind(domain_code)
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::database("Failed to restore batch request", e))?;

        Ok(())
    }
}

#[async_trait]
impl AuditSink for Database {
    async fn record(&self, record: AuditRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO event_audit (audit_id, event_kind, event_payload, response, delivered)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.event_kind.as_str())
        .bind(record.event_payload)
        .bind(record.response)
        .bind(record.delivered)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to audit event: {}", e)))?;

        Ok(())
    }
}
