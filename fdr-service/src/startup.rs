//! Application startup and lifecycle management.

use crate::config::FdrConfig;
use crate::handlers::{admin_router, metrics_middleware};
use crate::services::{
    get_metrics, init_metrics, Database, EventManager, EventReporter, HttpEventManager,
    NoopEventManager,
};
use crate::workers::{BatchOrchestrator, BatchScheduler};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use fdr_core::error::AppError;
use fdr_core::middleware::request_id_middleware;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "fdr-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "fdr-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server and worker lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    db: Arc<Database>,
    orchestrator: Arc<BatchOrchestrator>,
    scheduler: BatchScheduler,
    event_worker: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: FdrConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: FdrConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: FdrConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        let event_manager: Arc<dyn EventManager> = if config.event_manager.url.is_empty() {
            tracing::info!("Event manager URL not configured - events will only be audited");
            Arc::new(NoopEventManager)
        } else {
            tracing::info!(endpoint = %config.event_manager.url, "Reporting flow events to event manager");
            Arc::new(HttpEventManager::new(
                &config.event_manager.url,
                config.event_manager.timeout(),
            )?)
        };

        let (reporter, event_worker) =
            EventReporter::spawn(event_manager, db.clone(), config.event_manager.queue_size);

        let orchestrator = Arc::new(BatchOrchestrator::new(
            db.clone(),
            reporter,
            config.batch.page_size,
        ));

        let shutdown = CancellationToken::new();
        let scheduler = BatchScheduler::new(
            orchestrator.clone(),
            db.clone(),
            config.batch.clone(),
            shutdown.clone(),
        );

        let addr = config.common.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "FDR service listener bound");

        Ok(Self {
            port,
            listener,
            db,
            orchestrator,
            scheduler,
            event_worker,
            shutdown,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Token that stops the scheduler and the HTTP server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the application until the shutdown token is cancelled.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            db: self.db.clone(),
        };

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .with_state(health_state)
            .merge(admin_router(self.orchestrator.clone()))
            .layer(middleware::from_fn(metrics_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware));

        let scheduler = tokio::spawn(self.scheduler.run());

        tracing::info!(
            service = "fdr-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let shutdown = self.shutdown.clone();
        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        // The scheduler finishes its current pass before observing the token.
        self.shutdown.cancel();
        if let Err(e) = scheduler.await {
            tracing::error!(error = %e, "Batch scheduler task failed");
        }

        // Dropping the last reporter lets the event worker drain and exit.
        drop(self.orchestrator);
        if let Err(e) = self.event_worker.await {
            tracing::error!(error = %e, "Event reporter task failed");
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
