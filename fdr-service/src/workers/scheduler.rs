use crate::config::BatchConfig;
use crate::error::FlowError;
use crate::services::repository::BatchControlSource;
use crate::workers::orchestrator::{BatchOrchestrator, PassReport, RunRequest};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Drives passes from a timer and from the operator's batch-control marker.
pub struct BatchScheduler {
    orchestrator: Arc<BatchOrchestrator>,
    control: Arc<dyn BatchControlSource>,
    config: BatchConfig,
    shutdown: CancellationToken,
}

impl BatchScheduler {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        control: Arc<dyn BatchControlSource>,
        config: BatchConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            control,
            config,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled. A pass in progress is
    /// finished before the loop exits.
    pub async fn run(self) {
        if !self.config.enabled {
            tracing::info!("Batch scheduler disabled by configuration");
            return;
        }

        tracing::info!(
            batch_code = %self.config.batch_code,
            interval_secs = self.config.interval().as_secs(),
            control_poll_secs = self.config.control_poll_interval().as_secs(),
            page_size = self.config.page_size,
            "Starting batch scheduler"
        );

        let mut pass_ticker = interval(self.config.interval());
        pass_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll_ticker = interval(self.config.control_poll_interval());
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Batch scheduler shutting down");
                    break;
                }
                _ = pass_ticker.tick() => {
                    // Errors are logged by the orchestrator; the next tick retries.
                    let _ = self.orchestrator.run_pass(RunRequest::scheduled()).await;
                }
                _ = poll_ticker.tick() => {
                    if let Err(e) = self.poll_control().await {
                        tracing::warn!(error = %e, "Batch control poll failed");
                    }
                }
            }
        }
    }

    /// Honor a pending manual request. The marker is consumed before the
    /// pass runs and restored if the pass was skipped for another in flight.
    pub async fn poll_control(&self) -> Result<Option<PassReport>, FlowError> {
        let batch_code = &self.config.batch_code;
        let Some(control) = self.control.find_batch_control(batch_code).await? else {
            return Ok(None);
        };

        if !control.requested {
            return Ok(None);
        }

        self.control.clear_batch_request(batch_code).await?;

        tracing::info!(
            batch_code = %control.batch_code,
            domain_code = ?control.domain_code,
            "Manual batch run requested"
        );

        let result = self
            .orchestrator
            .run_pass(RunRequest::manual(control.domain_code.clone()))
            .await;

        let skipped = matches!(&result, Ok(report) if report.skipped);
        if skipped {
            tracing::info!(
                batch_code = %batch_code,
                "Pass in flight, manual request kept for the next poll"
            );
            self.control
                .restore_batch_request(batch_code, control.domain_code.as_deref())
                .await?;
        }

        result.map(Some)
    }
}
