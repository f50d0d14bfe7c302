//! Domain models for fdr-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Domain Registry Models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Domain {
    pub domain_code: String,
    pub description: Option<String>,
    pub enabled: bool,
}

// ============================================================================
// Flow Identity
// ============================================================================

/// Natural identity of one flow revision as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub domain_code: String,
    pub flow_code: String,
    pub provider_code: String,
    pub revision: i32,
}

impl FlowKey {
    pub fn new(domain_code: &str, flow_code: &str, provider_code: &str, revision: i32) -> Self {
        Self {
            domain_code: domain_code.to_string(),
            flow_code: flow_code.to_string(),
            provider_code: provider_code.to_string(),
            revision,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.domain_code, self.flow_code, self.provider_code, self.revision
        )
    }
}

// ============================================================================
// Staging Models
// ============================================================================

/// One payment line as reported inside a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedPayment {
    pub domain_code: String,
    pub payment_identifier: String,
    pub data_index: i32,
    pub outcome_code: i32,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<NaiveDate>,
}

/// Parsed content of a staged flow, handed over by the ingestion layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_payment_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_total_amount: Option<Decimal>,
    #[serde(default)]
    pub payments: Vec<ReportedPayment>,
}

impl FlowPayload {
    pub fn total_amount(&self) -> Decimal {
        self.payments.iter().map(|p| p.amount).sum()
    }
}

#[derive(Debug, Clone)]
pub struct NewStagingRecord {
    pub key: FlowKey,
    pub publication_time: DateTime<Utc>,
    pub payload: FlowPayload,
}

#[derive(Debug, Clone, FromRow)]
pub struct StagingRecord {
    pub staging_id: i64,
    pub domain_code: String,
    pub flow_code: String,
    pub provider_code: String,
    pub revision: i32,
    pub publication_time: DateTime<Utc>,
    pub processed: bool,
    pub payload: Json<FlowPayload>,
    pub created_utc: DateTime<Utc>,
}

impl StagingRecord {
    pub fn key(&self) -> FlowKey {
        FlowKey::new(
            &self.domain_code,
            &self.flow_code,
            &self.provider_code,
            self.revision,
        )
    }
}

// ============================================================================
// Flow Ledger Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Accepted,
    Anomalous,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Anomalous => "anomalous",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "accepted" => Self::Accepted,
            _ => Self::Anomalous,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FinalizedFlow {
    pub flow_id: Uuid,
    pub domain_code: String,
    pub flow_code: String,
    pub provider_code: String,
    pub revision: i32,
    pub publication_time: DateTime<Utc>,
    pub status: String,
    pub payment_count: i32,
    pub total_amount: Decimal,
    pub anomalies: Json<Vec<String>>,
    pub created_utc: DateTime<Utc>,
}

impl FinalizedFlow {
    pub fn status(&self) -> FlowStatus {
        FlowStatus::from_str(&self.status)
    }

    pub fn key(&self) -> FlowKey {
        FlowKey::new(
            &self.domain_code,
            &self.flow_code,
            &self.provider_code,
            self.revision,
        )
    }
}

// ============================================================================
// Payment Request / Payment Models
// ============================================================================

/// Outstanding payment request. A provider may report either identifier.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRequest {
    pub payment_request_id: Uuid,
    pub domain_code: String,
    pub request_identifier: String,
    pub payment_identifier: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub domain_code: String,
    pub payment_identifier: String,
    pub data_index: i32,
    pub outcome_code: i32,
    pub amount: Decimal,
}

/// Provider-reported outcome codes. Numeric values come from the upstream
/// reporting protocol and are stored as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeCode {
    Executed,
    Revoked,
    StandIn,
    StandInWithoutRequest,
    WithoutRequest,
    Unrecognized(i32),
}

impl OutcomeCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Executed,
            3 => Self::Revoked,
            4 => Self::StandIn,
            8 => Self::StandInWithoutRequest,
            9 => Self::WithoutRequest,
            other => Self::Unrecognized(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Executed => 0,
            Self::Revoked => 3,
            Self::StandIn => 4,
            Self::StandInWithoutRequest => 8,
            Self::WithoutRequest => 9,
            Self::Unrecognized(code) => *code,
        }
    }
}

// ============================================================================
// Reconciliation Entry Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Ok,
    OtherIntermediary,
    Anomalous,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::OtherIntermediary => "other_intermediary",
            Self::Anomalous => "anomalous",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ok" => Self::Ok,
            "other_intermediary" => Self::OtherIntermediary,
            _ => Self::Anomalous,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ReconciliationEntry {
    pub entry_id: Uuid,
    pub flow_id: Uuid,
    pub domain_code: String,
    pub payment_identifier: String,
    pub data_index: i32,
    pub outcome_code: i32,
    pub amount: Decimal,
    pub status: String,
    pub payment_request_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub anomalies: Json<Vec<String>>,
    pub created_utc: DateTime<Utc>,
}

impl ReconciliationEntry {
    pub fn status(&self) -> EntryStatus {
        EntryStatus::from_str(&self.status)
    }
}

// ============================================================================
// Promotion Plan
// ============================================================================

/// Everything one promotion writes; applied in a single transaction.
#[derive(Debug, Clone)]
pub struct PromotionPlan {
    pub staging_id: i64,
    pub flow: NewFinalizedFlow,
    pub entries: Vec<NewReconciliationEntry>,
}

#[derive(Debug, Clone)]
pub struct NewFinalizedFlow {
    pub flow_id: Uuid,
    pub key: FlowKey,
    pub publication_time: DateTime<Utc>,
    pub status: FlowStatus,
    pub payment_count: i32,
    pub total_amount: Decimal,
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewReconciliationEntry {
    pub domain_code: String,
    pub payment_identifier: String,
    pub data_index: i32,
    pub outcome_code: i32,
    pub amount: Decimal,
    pub status: EntryStatus,
    pub payment_request_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub anomalies: Vec<String>,
}

// ============================================================================
// Batch Control
// ============================================================================

/// Manual-trigger marker maintained by operators.
#[derive(Debug, Clone, FromRow)]
pub struct BatchControl {
    pub batch_code: String,
    pub requested: bool,
    pub domain_code: Option<String>,
    pub updated_utc: DateTime<Utc>,
}
