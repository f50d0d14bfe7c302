//! Operational endpoints: manual batch runs and staging reset.

use crate::workers::{BatchOrchestrator, PassReport, RunRequest};
use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use fdr_core::error::AppError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct AdminState {
    pub orchestrator: Arc<BatchOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct RunBatchQuery {
    pub domain: Option<String>,
}

pub fn admin_router(orchestrator: Arc<BatchOrchestrator>) -> Router {
    Router::new()
        .route("/admin/batch/run", post(run_batch))
        .route("/admin/staging/reset", post(reset_staging))
        .with_state(AdminState { orchestrator })
}

/// Run one pass now, optionally scoped to a domain.
pub async fn run_batch(
    State(state): State<AdminState>,
    Query(query): Query<RunBatchQuery>,
) -> Result<Json<PassReport>, AppError> {
    let domain = query.domain.filter(|d| !d.is_empty());
    let report = state.orchestrator.run_pass(RunRequest::manual(domain)).await?;
    Ok(Json(report))
}

pub async fn reset_staging(State(state): State<AdminState>) -> Result<Json<Value>, AppError> {
    let deleted = state.orchestrator.reset_staging().await?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlowKey, FlowPayload, NewStagingRecord};
    use crate::services::{EventReporter, FlowRepository, MemoryStore, NoopEventManager};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    fn app(store: Arc<MemoryStore>) -> Router {
        let (reporter, _handle) =
            EventReporter::spawn(Arc::new(NoopEventManager), store.clone(), 16);
        admin_router(Arc::new(BatchOrchestrator::new(store, reporter, 10)))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_run_batch_returns_pass_report() {
        let store = Arc::new(MemoryStore::new());
        store.add_domain("A", true);

        let response = app(store)
            .oneshot(
                Request::post("/admin/batch/run?domain=A")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["domain_code"], "A");
        assert_eq!(body["fetched"], 0);
        assert_eq!(body["skipped"], false);
    }

    #[tokio::test]
    async fn test_run_batch_for_unknown_domain_is_not_found() {
        let store = Arc::new(MemoryStore::new());

        let response = app(store)
            .oneshot(
                Request::post("/admin/batch/run?domain=NOPE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reset_reports_deleted_rows() {
        let store = Arc::new(MemoryStore::new());
        for revision in 1..=3 {
            store
                .stage(NewStagingRecord {
                    key: FlowKey::new("A", "F1", "P1", revision),
                    publication_time: Utc::now(),
                    payload: FlowPayload::default(),
                })
                .await
                .unwrap();
        }

        let response = app(store.clone())
            .oneshot(
                Request::post("/admin/staging/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["deleted"], 3);
        assert!(store.staged_rows().is_empty());
    }
}
