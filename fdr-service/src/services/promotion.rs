//! Promotion of staged flows into the ledger.

use crate::error::FlowError;
use crate::models::{
    EntryStatus, FinalizedFlow, FlowPayload, FlowStatus, NewFinalizedFlow,
    NewReconciliationEntry, PromotionPlan, StagingRecord,
};
use crate::services::matching::PaymentMatcher;
use crate::services::metrics::record_reconciliation_entry;
use crate::services::repository::FlowRepository;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Registry state of the domain a flow was reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    Enabled,
    Disabled,
    Unregistered,
}

/// Flow-level checks that do not depend on payment lookups.
pub fn structural_anomalies(
    domain_code: &str,
    payload: &FlowPayload,
    domain: DomainState,
) -> Vec<String> {
    let mut anomalies = Vec::new();

    match domain {
        DomainState::Enabled => {}
        DomainState::Disabled => {
            anomalies.push(format!("Domain {} is not enabled for reconciliation", domain_code))
        }
        DomainState::Unregistered => {
            anomalies.push(format!("Domain {} is not registered", domain_code))
        }
    }

    if payload.payments.is_empty() {
        anomalies.push("Flow contains no payments".to_string());
    }

    if let Some(declared) = payload.declared_payment_count {
        let actual = payload.payments.len();
        if usize::try_from(declared).ok() != Some(actual) {
            anomalies.push(format!(
                "Declared payment count {} does not match {} reported payments",
                declared, actual
            ));
        }
    }

    if let Some(declared) = payload.declared_total_amount {
        let actual = payload.total_amount();
        if declared != actual {
            anomalies.push(format!(
                "Declared total amount {} does not match reported total {}",
                declared, actual
            ));
        }
    }

    anomalies
}

/// Line count as stored in the ledger. A count past `i32::MAX` is stored
/// saturated and flagged.
fn stored_payment_count(lines: usize, anomalies: &mut Vec<String>) -> i32 {
    i32::try_from(lines).unwrap_or_else(|_| {
        anomalies.push(format!("Flow reports {} payments, above the storable maximum", lines));
        i32::MAX
    })
}

pub struct FlowPromoter {
    repo: Arc<dyn FlowRepository>,
}

impl FlowPromoter {
    pub fn new(repo: Arc<dyn FlowRepository>) -> Self {
        Self { repo }
    }

    /// Resolve every payment line and derive the flow status.
    pub async fn plan(
        &self,
        record: &StagingRecord,
        domain: DomainState,
    ) -> Result<PromotionPlan, FlowError> {
        let payload = &record.payload.0;
        let mut anomalies = structural_anomalies(&record.domain_code, payload, domain);

        let matcher = PaymentMatcher::new(self.repo.as_ref());
        let mut entries = Vec::with_capacity(payload.payments.len());
        for line in &payload.payments {
            let outcome = matcher.reconcile_line(line).await?;
            entries.push(NewReconciliationEntry {
                domain_code: line.domain_code.clone(),
                payment_identifier: line.payment_identifier.clone(),
                data_index: line.data_index,
                outcome_code: line.outcome_code,
                amount: line.amount,
                status: outcome.status,
                payment_request_id: outcome.payment_request_id,
                payment_id: outcome.payment_id,
                anomalies: outcome.anomalies,
            });
        }

        let anomalous_lines = entries
            .iter()
            .filter(|e| e.status == EntryStatus::Anomalous)
            .count();
        if anomalous_lines > 0 {
            anomalies.push(format!("{} payment line(s) anomalous", anomalous_lines));
        }

        let payment_count = stored_payment_count(entries.len(), &mut anomalies);

        let status = if anomalies.is_empty() {
            FlowStatus::Accepted
        } else {
            FlowStatus::Anomalous
        };

        Ok(PromotionPlan {
            staging_id: record.staging_id,
            flow: NewFinalizedFlow {
                flow_id: Uuid::new_v4(),
                key: record.key(),
                publication_time: record.publication_time,
                status,
                payment_count,
                total_amount: payload.total_amount(),
                anomalies,
            },
            entries,
        })
    }

    /// Plan and atomically write one staged flow.
    ///
    /// Storage failures surface as [`FlowError::PromotionTransaction`]; the
    /// staging row is then still unprocessed.
    #[instrument(skip(self, record), fields(flow = %record.key()))]
    pub async fn promote(
        &self,
        record: &StagingRecord,
        domain: DomainState,
    ) -> Result<FinalizedFlow, FlowError> {
        let key = record.key();
        let wrap = |err: FlowError| match err {
            FlowError::Store(source) => FlowError::PromotionTransaction {
                key: key.clone(),
                source,
            },
            other => other,
        };

        let plan = self.plan(record, domain).await.map_err(wrap)?;
        let statuses: Vec<EntryStatus> = plan.entries.iter().map(|e| e.status).collect();
        let flow = self.repo.promote(plan).await.map_err(wrap)?;

        for status in statuses {
            record_reconciliation_entry(status.as_str());
        }

        info!(
            flow_id = %flow.flow_id,
            status = %flow.status,
            payment_count = flow.payment_count,
            "Flow promoted"
        );

        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportedPayment;
    use rust_decimal::Decimal;

    fn line(amount: i64) -> ReportedPayment {
        ReportedPayment {
            domain_code: "A".to_string(),
            payment_identifier: "X".to_string(),
            data_index: 1,
            outcome_code: 0,
            amount: Decimal::new(amount, 2),
            receipt_identifier: None,
            payment_date: None,
        }
    }

    #[test]
    fn test_consistent_payload_has_no_anomalies() {
        let payload = FlowPayload {
            declared_payment_count: Some(2),
            declared_total_amount: Some(Decimal::new(300, 2)),
            payments: vec![line(100), line(200)],
        };
        assert!(structural_anomalies("A", &payload, DomainState::Enabled).is_empty());
    }

    #[test]
    fn test_disabled_domain_is_flagged() {
        let payload = FlowPayload {
            payments: vec![line(100)],
            ..Default::default()
        };
        let anomalies = structural_anomalies("A", &payload, DomainState::Disabled);
        assert_eq!(anomalies, vec!["Domain A is not enabled for reconciliation"]);
    }

    #[test]
    fn test_declared_totals_must_match() {
        let payload = FlowPayload {
            declared_payment_count: Some(3),
            declared_total_amount: Some(Decimal::new(999, 2)),
            payments: vec![line(100)],
        };
        let anomalies = structural_anomalies("A", &payload, DomainState::Enabled);
        assert_eq!(anomalies.len(), 2);
        assert!(anomalies[0].starts_with("Declared payment count 3"));
        assert!(anomalies[1].starts_with("Declared total amount 9.99"));
    }

    #[test]
    fn test_empty_flow_from_unregistered_domain() {
        let anomalies =
            structural_anomalies("Z", &FlowPayload::default(), DomainState::Unregistered);
        assert_eq!(
            anomalies,
            vec!["Domain Z is not registered", "Flow contains no payments"]
        );
    }

    #[test]
    fn test_payment_count_within_range_is_stored_as_is() {
        let mut anomalies = Vec::new();
        assert_eq!(stored_payment_count(42, &mut anomalies), 42);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_payment_count_past_i32_saturates_and_is_flagged() {
        let mut anomalies = Vec::new();
        let lines = i32::MAX as usize + 1;

        assert_eq!(stored_payment_count(lines, &mut anomalies), i32::MAX);
        assert_eq!(anomalies.len(), 1);
        assert!(anomalies[0].contains("above the storable maximum"));
    }
}
