//! Flow events sent to the external event manager, and auditing of each
//! delivery attempt.
//!
//! Reporting is fire-and-forget: [`EventReporter::report`] only enqueues, and a
//! background task performs delivery and auditing. Nothing here can fail a
//! batch pass.

use crate::models::FlowKey;
use crate::services::metrics::record_event_delivery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fdr_core::error::AppError;
use fdr_core::observability::TracedClientExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Payload stored in place of anything that fails to serialize.
pub const SERIALIZATION_FAILURE_SENTINEL: &str = "{\"error\":\"unserializable payload\"}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowEventKind {
    FlowAccepted,
    FlowAnomalous,
    DuplicateFlow,
    PromotionFailed,
}

impl FlowEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlowAccepted => "flow_accepted",
            Self::FlowAnomalous => "flow_anomalous",
            Self::DuplicateFlow => "duplicate_flow",
            Self::PromotionFailed => "promotion_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    pub kind: FlowEventKind,
    pub flow: FlowKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub occurred_utc: DateTime<Utc>,
}

impl FlowEvent {
    pub fn new(kind: FlowEventKind, flow: FlowKey, detail: Option<String>) -> Self {
        Self {
            kind,
            flow,
            detail,
            occurred_utc: Utc::now(),
        }
    }
}

/// Successful response from the event manager.
#[derive(Debug, Clone)]
pub struct EventResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum EventDeliveryError {
    #[error("Event manager returned HTTP {status}")]
    Http { status: u16, body: Vec<u8> },

    #[error("Event manager unreachable: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EventManager: Send + Sync {
    async fn send(&self, event: &FlowEvent) -> Result<EventResponse, EventDeliveryError>;
}

/// One audited delivery attempt.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event_kind: FlowEventKind,
    pub event_payload: Vec<u8>,
    pub response: Vec<u8>,
    pub delivered: bool,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), AppError>;
}

/// Serialize to JSON bytes, or the sentinel when that is impossible.
pub fn serialize_or_sentinel<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialize event data");
        SERIALIZATION_FAILURE_SENTINEL.as_bytes().to_vec()
    })
}

/// Transportable form of a delivery result: the response body on success,
/// the response body of an HTTP failure, otherwise the error text.
pub fn serialize_outcome(result: &Result<EventResponse, EventDeliveryError>) -> (Vec<u8>, bool) {
    match result {
        Ok(response) => (serialize_or_sentinel(&response.body), true),
        Err(EventDeliveryError::Http { body, .. }) => (body.clone(), false),
        Err(err @ EventDeliveryError::Transport(_)) => (err.to_string().into_bytes(), false),
    }
}

// ============================================================================
// Event Managers
// ============================================================================

/// Event manager reached over HTTP with a JSON POST.
pub struct HttpEventManager {
    client: reqwest::Client,
    url: String,
}

impl HttpEventManager {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl EventManager for HttpEventManager {
    async fn send(&self, event: &FlowEvent) -> Result<EventResponse, EventDeliveryError> {
        let response = self
            .client
            .traced_post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| EventDeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| EventDeliveryError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(EventDeliveryError::Http {
                status: status.as_u16(),
                body: body.to_vec(),
            });
        }

        let body = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };

        Ok(EventResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Used when no event manager is configured; every event is acknowledged.
pub struct NoopEventManager;

#[async_trait]
impl EventManager for NoopEventManager {
    async fn send(&self, _event: &FlowEvent) -> Result<EventResponse, EventDeliveryError> {
        Ok(EventResponse {
            status: 204,
            body: serde_json::Value::Null,
        })
    }
}

// ============================================================================
// Reporter
// ============================================================================

#[derive(Clone)]
pub struct EventReporter {
    tx: mpsc::Sender<FlowEvent>,
}

impl EventReporter {
    /// Start the delivery task. It exits once every reporter clone is dropped
    /// and the queue is drained.
    pub fn spawn(
        manager: Arc<dyn EventManager>,
        audit: Arc<dyn AuditSink>,
        queue_size: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<FlowEvent>(queue_size.max(1));

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(manager.as_ref(), audit.as_ref(), &event).await;
            }
            debug!("Event reporter queue closed");
        });

        (Self { tx }, handle)
    }

    /// Enqueue without waiting; a full queue drops the event.
    pub fn report(&self, event: FlowEvent) {
        if let Err(e) = self.tx.try_send(event) {
            record_event_delivery("dropped");
            warn!(error = %e, "Event queue unavailable, dropping flow event");
        }
    }
}

async fn deliver(manager: &dyn EventManager, audit: &dyn AuditSink, event: &FlowEvent) {
    let event_payload = serialize_or_sentinel(event);
    let result = manager.send(event).await;

    if let Err(e) = &result {
        warn!(
            error = %e,
            event_kind = event.kind.as_str(),
            flow = %event.flow,
            "Event manager delivery failed"
        );
    }

    let (response, delivered) = serialize_outcome(&result);
    record_event_delivery(if delivered { "delivered" } else { "failed" });

    let record = AuditRecord {
        event_kind: event.kind,
        event_payload,
        response,
        delivered,
    };
    if let Err(e) = audit.record(record).await {
        warn!(error = %e, "Failed to audit event delivery");
    }
}
