//! Pipeline error taxonomy.

use crate::models::FlowKey;
use fdr_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    /// Staging or ledger natural-key collision.
    #[error("Duplicate flow: {0}")]
    DuplicateFlow(FlowKey),

    #[error("No payment request for identifier {identifier} in domain {domain_code}")]
    UnmatchedPaymentRequest {
        domain_code: String,
        identifier: String,
    },

    #[error(
        "No payment for identifier {identifier} (data index {data_index}) in domain {domain_code}"
    )]
    UnmatchedPayment {
        domain_code: String,
        identifier: String,
        data_index: i32,
    },

    /// The atomic ledger + entries write failed and was rolled back.
    #[error("Promotion of flow {key} failed: {source}")]
    PromotionTransaction {
        key: FlowKey,
        #[source]
        source: AppError,
    },

    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl FlowError {
    /// Wrap a sqlx failure the way every store operation reports it.
    pub fn database(context: &str, err: sqlx::Error) -> Self {
        FlowError::Store(AppError::DatabaseError(anyhow::anyhow!(
            "{}: {}",
            context,
            err
        )))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, FlowError::DuplicateFlow(_))
    }
}

impl From<FlowError> for AppError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Store(inner) => inner,
            FlowError::DuplicateFlow(key) => {
                AppError::Conflict(anyhow::anyhow!("Duplicate flow: {}", key))
            }
            FlowError::UnknownDomain(code) => {
                AppError::NotFound(anyhow::anyhow!("Unknown domain: {}", code))
            }
            other => AppError::InternalError(anyhow::Error::new(other)),
        }
    }
}
