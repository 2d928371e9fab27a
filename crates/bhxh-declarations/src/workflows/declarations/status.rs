//! Transition rules for participant and declaration statuses, plus a read-side
//! consistency check between the independently stored status fields.

use std::collections::BTreeMap;

use serde::Serialize;

use super::contribution::ContributionPolicy;
use super::domain::{
    Declaration, DeclarationId, DeclarationStatus, Participant, ParticipantId, ParticipantStatus,
    Payment, PaymentId, PaymentStatus,
};

impl ParticipantStatus {
    /// Whether moving to `next` is a sanctioned edge. Re-applying the current status is a no-op
    /// and always allowed.
    pub fn can_transition_to(self, next: ParticipantStatus) -> bool {
        use ParticipantStatus::*;
        self == next
            || matches!(
                (self, next),
                (Draft, Submitted)
                    | (Submitted, Processing)
                    | (Processing, Approved)
                    | (Processing, Rejected)
            )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ParticipantStatus::Approved | ParticipantStatus::Rejected)
    }

    /// True once the participant has left the draft stage.
    pub const fn is_handed_off(self) -> bool {
        !matches!(self, ParticipantStatus::Draft)
    }
}

impl DeclarationStatus {
    pub fn can_transition_to(self, next: DeclarationStatus) -> bool {
        use DeclarationStatus::*;
        self == next
            || matches!(
                (self, next),
                (Draft, Submitted)
                    | (Submitted, PendingPayment)
                    | (Submitted, Processing)
                    | (PendingPayment, Processing)
            )
    }

    /// Ordered list of edges that walk `self` forward to `target`, or `None` when the target is
    /// not reachable.
    pub fn path_to(self, target: DeclarationStatus) -> Option<Vec<DeclarationStatus>> {
        use DeclarationStatus::*;
        if self == target {
            return Some(Vec::new());
        }
        if self.can_transition_to(target) {
            return Some(vec![target]);
        }
        match (self, target) {
            (Draft, PendingPayment) => Some(vec![Submitted, PendingPayment]),
            (Draft, Processing) => Some(vec![Submitted, Processing]),
            _ => None,
        }
    }
}

/// Disagreement between stored status fields detected by [`reconcile_statuses`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusInconsistency {
    /// Participant was handed in but references another declaration.
    ForeignParticipant {
        participant_id: ParticipantId,
        declaration_id: DeclarationId,
    },
    /// Participant payment status differs from its linked payment.
    PaymentLinkDrift {
        participant_id: ParticipantId,
        payment_id: Option<PaymentId>,
        expected: Option<PaymentStatus>,
        actual: Option<PaymentStatus>,
    },
    /// Linked payment is unknown to the declaration.
    DanglingPaymentLink {
        participant_id: ParticipantId,
        payment_id: PaymentId,
    },
    /// More than one pending payment currently has participants attached.
    MultiplePendingPayments { payment_ids: Vec<PaymentId> },
    /// Pending-payment declaration holds participants the pending payment does not cover.
    UncoveredParticipants {
        payment_id: PaymentId,
        participant_ids: Vec<ParticipantId>,
    },
    /// Payment amount differs from the contributions of its linked participants.
    AmountMismatch {
        payment_id: PaymentId,
        expected: i64,
        actual: i64,
    },
    /// Declaration status cannot be derived from its participants and payments.
    AggregateMismatch {
        declaration_status: DeclarationStatus,
        detail: String,
    },
}

/// Recompute the status invariants for one declaration from its current rows.
///
/// Returns an empty list when the stored fields agree. Amount checks use `policy` against the
/// participants linked at the time of the call.
pub fn reconcile_statuses(
    declaration: &Declaration,
    participants: &[Participant],
    payments: &[Payment],
    policy: ContributionPolicy,
) -> Vec<StatusInconsistency> {
    let mut findings = Vec::new();
    let payments_by_id: BTreeMap<&PaymentId, &Payment> =
        payments.iter().map(|payment| (&payment.id, payment)).collect();
    let mut linked: BTreeMap<&PaymentId, Vec<&Participant>> = BTreeMap::new();

    for participant in participants {
        if participant.declaration_id != declaration.id {
            findings.push(StatusInconsistency::ForeignParticipant {
                participant_id: participant.id.clone(),
                declaration_id: participant.declaration_id.clone(),
            });
            continue;
        }

        match &participant.payment_id {
            Some(payment_id) => match payments_by_id.get(payment_id) {
                Some(payment) => {
                    if participant.payment_status != Some(payment.status) {
                        findings.push(StatusInconsistency::PaymentLinkDrift {
                            participant_id: participant.id.clone(),
                            payment_id: Some(payment_id.clone()),
                            expected: Some(payment.status),
                            actual: participant.payment_status,
                        });
                    }
                    linked.entry(payment_id).or_default().push(participant);
                }
                None => findings.push(StatusInconsistency::DanglingPaymentLink {
                    participant_id: participant.id.clone(),
                    payment_id: payment_id.clone(),
                }),
            },
            None => {
                if participant.payment_status.is_some() {
                    findings.push(StatusInconsistency::PaymentLinkDrift {
                        participant_id: participant.id.clone(),
                        payment_id: None,
                        expected: None,
                        actual: participant.payment_status,
                    });
                }
            }
        }
    }

    let pending_with_links: Vec<&Payment> = payments
        .iter()
        .filter(|payment| payment.status == PaymentStatus::Pending)
        .filter(|payment| linked.contains_key(&payment.id))
        .collect();
    if pending_with_links.len() > 1 {
        findings.push(StatusInconsistency::MultiplePendingPayments {
            payment_ids: pending_with_links.iter().map(|p| p.id.clone()).collect(),
        });
    }

    for payment in payments {
        if payment.status != PaymentStatus::Pending {
            continue;
        }
        if let Some(members) = linked.get(&payment.id) {
            let expected = policy.total(members.iter().copied());
            if expected != payment.amount {
                findings.push(StatusInconsistency::AmountMismatch {
                    payment_id: payment.id.clone(),
                    expected,
                    actual: payment.amount,
                });
            }
        }
    }

    let own: Vec<&Participant> = participants
        .iter()
        .filter(|participant| participant.declaration_id == declaration.id)
        .collect();

    match declaration.status {
        DeclarationStatus::PendingPayment => match pending_with_links.first() {
            Some(payment) => {
                let uncovered: Vec<ParticipantId> = own
                    .iter()
                    .filter(|participant| participant.payment_id.as_ref() != Some(&payment.id))
                    .map(|participant| participant.id.clone())
                    .collect();
                if !uncovered.is_empty() {
                    findings.push(StatusInconsistency::UncoveredParticipants {
                        payment_id: payment.id.clone(),
                        participant_ids: uncovered,
                    });
                }
            }
            None if !own.is_empty() => findings.push(StatusInconsistency::AggregateMismatch {
                declaration_status: declaration.status,
                detail: "awaiting payment without a pending payment".to_string(),
            }),
            None => {}
        },
        DeclarationStatus::Processing => {
            if own
                .iter()
                .any(|participant| participant.status == ParticipantStatus::Draft)
            {
                findings.push(StatusInconsistency::AggregateMismatch {
                    declaration_status: declaration.status,
                    detail: "processing declaration still holds draft participants".to_string(),
                });
            }
        }
        DeclarationStatus::Draft | DeclarationStatus::Submitted => {
            if own.iter().any(|participant| {
                matches!(
                    participant.status,
                    ParticipantStatus::Processing
                        | ParticipantStatus::Approved
                        | ParticipantStatus::Rejected
                )
            }) {
                findings.push(StatusInconsistency::AggregateMismatch {
                    declaration_status: declaration.status,
                    detail: "participants are ahead of their declaration".to_string(),
                });
            }
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::declarations::domain::UserId;
    use chrono::{TimeZone, Utc};

    fn declaration(status: DeclarationStatus) -> Declaration {
        Declaration {
            id: DeclarationId("d-1".to_string()),
            code: "KK001".to_string(),
            name: "Quarterly renewals".to_string(),
            kind: "tang_moi".to_string(),
            status,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
            approved_at: None,
            owner_id: UserId("agent-1".to_string()),
            unit_code: None,
            agency_code: None,
            parent_id: None,
            note: None,
        }
    }

    fn participant(id: &str, amount: i64, status: ParticipantStatus) -> Participant {
        Participant {
            id: ParticipantId(id.to_string()),
            declaration_id: DeclarationId("d-1".to_string()),
            full_name: format!("Participant {id}"),
            national_id: None,
            insurance_id: None,
            contribution: Some(amount),
            secondary_contribution: None,
            status,
            payment_status: None,
            payment_id: None,
            submitted_at: None,
            settled_at: None,
        }
    }

    fn payment(id: &str, amount: i64, status: PaymentStatus) -> Payment {
        Payment {
            id: PaymentId(id.to_string()),
            declaration_id: DeclarationId("d-1".to_string()),
            amount,
            method: "bank_transfer".to_string(),
            description: "KK001".to_string(),
            creator_id: UserId("agent-1".to_string()),
            status,
            created_at: Utc.with_ymd_and_hms(2025, 3, 2, 8, 0, 0).unwrap(),
            settled_at: None,
        }
    }

    fn link(mut participant: Participant, payment: &Payment) -> Participant {
        participant.payment_id = Some(payment.id.clone());
        participant.payment_status = Some(payment.status);
        participant
    }

    #[test]
    fn participant_edges_follow_the_lifecycle() {
        use ParticipantStatus::*;
        assert!(Draft.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Rejected));
        assert!(Submitted.can_transition_to(Submitted));
        assert!(!Draft.can_transition_to(Processing));
        assert!(!Approved.can_transition_to(Draft));
        assert!(Approved.is_terminal());
    }

    #[test]
    fn declaration_path_walks_through_submitted() {
        use DeclarationStatus::*;
        assert_eq!(Draft.path_to(PendingPayment), Some(vec![Submitted, PendingPayment]));
        assert_eq!(Submitted.path_to(PendingPayment), Some(vec![PendingPayment]));
        assert_eq!(Processing.path_to(Processing), Some(Vec::new()));
        assert_eq!(Processing.path_to(Draft), None);
    }

    #[test]
    fn consistent_pending_declaration_reports_nothing() {
        let pay = payment("pay-1", 300, PaymentStatus::Pending);
        let participants = vec![
            link(participant("p-1", 100, ParticipantStatus::Submitted), &pay),
            link(participant("p-2", 200, ParticipantStatus::Submitted), &pay),
        ];
        let findings = reconcile_statuses(
            &declaration(DeclarationStatus::PendingPayment),
            &participants,
            &[pay],
            ContributionPolicy::default(),
        );
        assert!(findings.is_empty(), "unexpected findings: {findings:?}");
    }

    #[test]
    fn detects_uncovered_participants_and_amount_mismatch() {
        let pay = payment("pay-1", 250, PaymentStatus::Pending);
        let participants = vec![
            link(participant("p-1", 100, ParticipantStatus::Submitted), &pay),
            participant("p-2", 200, ParticipantStatus::Draft),
        ];
        let findings = reconcile_statuses(
            &declaration(DeclarationStatus::PendingPayment),
            &participants,
            &[pay],
            ContributionPolicy::default(),
        );

        assert!(findings.contains(&StatusInconsistency::AmountMismatch {
            payment_id: PaymentId("pay-1".to_string()),
            expected: 100,
            actual: 250,
        }));
        assert!(findings.iter().any(|finding| matches!(
            finding,
            StatusInconsistency::UncoveredParticipants { participant_ids, .. }
                if participant_ids == &vec![ParticipantId("p-2".to_string())]
        )));
    }

    #[test]
    fn detects_payment_link_drift() {
        let pay = payment("pay-1", 100, PaymentStatus::Completed);
        let mut drifted = link(participant("p-1", 100, ParticipantStatus::Submitted), &pay);
        drifted.payment_status = Some(PaymentStatus::Pending);

        let findings = reconcile_statuses(
            &declaration(DeclarationStatus::Processing),
            &[drifted],
            &[pay],
            ContributionPolicy::default(),
        );
        assert!(matches!(
            findings.as_slice(),
            [StatusInconsistency::PaymentLinkDrift {
                expected: Some(PaymentStatus::Completed),
                actual: Some(PaymentStatus::Pending),
                ..
            }]
        ));
    }

    #[test]
    fn detects_multiple_pending_payments() {
        let first = payment("pay-1", 100, PaymentStatus::Pending);
        let second = payment("pay-2", 200, PaymentStatus::Pending);
        let participants = vec![
            link(participant("p-1", 100, ParticipantStatus::Submitted), &first),
            link(participant("p-2", 200, ParticipantStatus::Submitted), &second),
        ];
        let findings = reconcile_statuses(
            &declaration(DeclarationStatus::PendingPayment),
            &participants,
            &[first, second],
            ContributionPolicy::default(),
        );
        assert!(findings
            .iter()
            .any(|finding| matches!(finding, StatusInconsistency::MultiplePendingPayments { .. })));
    }

    #[test]
    fn empty_declaration_after_split_is_consistent() {
        let findings = reconcile_statuses(
            &declaration(DeclarationStatus::Draft),
            &[],
            &[],
            ContributionPolicy::default(),
        );
        assert!(findings.is_empty());
    }
}
