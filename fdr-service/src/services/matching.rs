//! Payment matching and outcome-code decision.

use crate::error::FlowError;
use crate::models::{EntryStatus, OutcomeCode, PaymentRequest, ReportedPayment};
use crate::services::repository::FlowRepository;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Per-line verdict before it is written as a reconciliation entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LineOutcome {
    pub status: EntryStatus,
    pub payment_request_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub anomalies: Vec<String>,
}

/// Map lookup results and the reported code onto an entry status.
///
/// A line without a payment request is always anomalous. Code 0 is only
/// accepted when a payment record backs it.
pub fn decide_entry_status(
    request_matched: bool,
    payment_matched: bool,
    outcome: OutcomeCode,
) -> EntryStatus {
    if !request_matched {
        return EntryStatus::Anomalous;
    }

    match outcome {
        OutcomeCode::Executed if payment_matched => EntryStatus::Ok,
        OutcomeCode::Executed => EntryStatus::Anomalous,
        OutcomeCode::Revoked | OutcomeCode::StandIn => EntryStatus::OtherIntermediary,
        OutcomeCode::StandInWithoutRequest
        | OutcomeCode::WithoutRequest
        | OutcomeCode::Unrecognized(_) => EntryStatus::Anomalous,
    }
}

fn outcome_anomaly(outcome: OutcomeCode) -> Option<String> {
    match outcome {
        OutcomeCode::StandInWithoutRequest => {
            Some("Outcome code 8: stand-in payment without a paired request record".to_string())
        }
        OutcomeCode::WithoutRequest => {
            Some("Outcome code 9: payment without a paired request record".to_string())
        }
        OutcomeCode::Unrecognized(code) => Some(format!("Unrecognized outcome code {}", code)),
        _ => None,
    }
}

pub struct PaymentMatcher<'a> {
    repo: &'a dyn FlowRepository,
}

impl<'a> PaymentMatcher<'a> {
    pub fn new(repo: &'a dyn FlowRepository) -> Self {
        Self { repo }
    }

    /// First payment request whose request identifier, then payment
    /// identifier, equals `identifier`.
    pub async fn find_payment_request(
        &self,
        domain_code: &str,
        identifier: &str,
    ) -> Result<Option<PaymentRequest>, FlowError> {
        if let Some(found) = self
            .repo
            .find_payment_request_by_request_identifier(domain_code, identifier)
            .await?
        {
            return Ok(Some(found));
        }

        self.repo
            .find_payment_request_by_payment_identifier(domain_code, identifier)
            .await
    }

    #[instrument(skip(self, line), fields(
        domain_code = %line.domain_code,
        payment_identifier = %line.payment_identifier,
        data_index = line.data_index,
        outcome_code = line.outcome_code,
    ))]
    pub async fn reconcile_line(&self, line: &ReportedPayment) -> Result<LineOutcome, FlowError> {
        let outcome = OutcomeCode::from_code(line.outcome_code);
        let mut anomalies = Vec::new();

        let request = self
            .find_payment_request(&line.domain_code, &line.payment_identifier)
            .await?;
        if request.is_none() {
            anomalies.push(
                FlowError::UnmatchedPaymentRequest {
                    domain_code: line.domain_code.clone(),
                    identifier: line.payment_identifier.clone(),
                }
                .to_string(),
            );
        }

        let payment = self
            .repo
            .find_payment(&line.domain_code, &line.payment_identifier, line.data_index)
            .await?;
        if payment.is_none() && outcome == OutcomeCode::Executed {
            anomalies.push(
                FlowError::UnmatchedPayment {
                    domain_code: line.domain_code.clone(),
                    identifier: line.payment_identifier.clone(),
                    data_index: line.data_index,
                }
                .to_string(),
            );
        }

        if let Some(anomaly) = outcome_anomaly(outcome) {
            anomalies.push(anomaly);
        }

        let status = decide_entry_status(request.is_some(), payment.is_some(), outcome);
        debug!(status = status.as_str(), "Payment line reconciled");

        Ok(LineOutcome {
            status,
            payment_request_id: request.map(|r| r.payment_request_id),
            payment_id: payment.map(|p| p.payment_id),
            anomalies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executed_with_both_matches_is_ok() {
        assert_eq!(
            decide_entry_status(true, true, OutcomeCode::Executed),
            EntryStatus::Ok
        );
    }

    #[test]
    fn test_executed_without_payment_is_anomalous() {
        assert_eq!(
            decide_entry_status(true, false, OutcomeCode::Executed),
            EntryStatus::Anomalous
        );
    }

    #[test]
    fn test_missing_request_is_always_anomalous() {
        for code in [0, 3, 4, 8, 9, 42] {
            for payment_matched in [true, false] {
                assert_eq!(
                    decide_entry_status(false, payment_matched, OutcomeCode::from_code(code)),
                    EntryStatus::Anomalous,
                    "code {} payment_matched {}",
                    code,
                    payment_matched
                );
            }
        }
    }

    #[test]
    fn test_revoked_and_stand_in_route_to_other_intermediary() {
        for outcome in [OutcomeCode::Revoked, OutcomeCode::StandIn] {
            assert_eq!(
                decide_entry_status(true, false, outcome),
                EntryStatus::OtherIntermediary
            );
            assert_eq!(
                decide_entry_status(true, true, outcome),
                EntryStatus::OtherIntermediary
            );
        }
    }

    #[test]
    fn test_codes_without_request_record_are_anomalous() {
        for outcome in [
            OutcomeCode::StandInWithoutRequest,
            OutcomeCode::WithoutRequest,
            OutcomeCode::Unrecognized(1),
        ] {
            assert_eq!(
                decide_entry_status(true, true, outcome),
                EntryStatus::Anomalous
            );
        }
    }

    #[test]
    fn test_outcome_anomaly_only_for_unpaired_or_unknown_codes() {
        assert!(outcome_anomaly(OutcomeCode::Executed).is_none());
        assert!(outcome_anomaly(OutcomeCode::Revoked).is_none());
        assert!(outcome_anomaly(OutcomeCode::WithoutRequest).is_some());
        assert_eq!(
            outcome_anomaly(OutcomeCode::Unrecognized(7)).as_deref(),
            Some("Unrecognized outcome code 7")
        );
    }
}
