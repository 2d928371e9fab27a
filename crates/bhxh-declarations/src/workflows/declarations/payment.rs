use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::contribution::ContributionPolicy;
use super::domain::{
    DeclarationId, DeclarationStatus, NewPayment, ParticipantId, ParticipantStatus, Payment,
    PaymentId, PaymentStatus, UserId,
};
use super::events::{EventBus, EventKind, WorkflowEvent};
use super::outcome::BatchOutcome;
use super::planner::{BillingGroup, ValidationError};
use super::repository::{DeclarationStore, RepositoryError};
use super::service::DeclarationWorkflowError;

/// Result of billing one declaration.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub links: BatchOutcome,
    pub declaration_status: DeclarationStatus,
    pub warnings: Vec<String>,
}

/// Result of propagating a confirmed settlement.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub payment: Payment,
    /// True when the payment was already completed before this call.
    pub already_settled: bool,
    pub participants: BatchOutcome,
    pub synced_links: usize,
    pub declaration_status: Option<DeclarationStatus>,
    pub warnings: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_fully_propagated(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Creates payments sized to a billing group and reconciles them once settled.
pub struct PaymentOrchestrator<S, E> {
    store: Arc<S>,
    events: Arc<E>,
    policy: ContributionPolicy,
    method: String,
}

impl<S, E> PaymentOrchestrator<S, E>
where
    S: DeclarationStore + 'static,
    E: EventBus + 'static,
{
    pub fn new(
        store: Arc<S>,
        events: Arc<E>,
        policy: ContributionPolicy,
        method: impl Into<String>,
    ) -> Self {
        Self {
            store,
            events,
            policy,
            method: method.into(),
        }
    }

    /// Bill the full participant set of `group.declaration`.
    ///
    /// The amount is recomputed from the store at call time. Nothing is written when the group
    /// does not match the declaration or the amount is not positive.
    pub fn create_for_selection(
        &self,
        group: &BillingGroup,
        actor: &UserId,
    ) -> Result<PaymentReceipt, DeclarationWorkflowError> {
        let declaration_id = &group.declaration.id;
        if group.participants.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        let current = self.store.participants_of(declaration_id)?;
        let expected: BTreeSet<&ParticipantId> = group.participants.iter().map(|p| &p.id).collect();
        let actual: BTreeSet<&ParticipantId> = current.iter().map(|p| &p.id).collect();
        if expected != actual {
            return Err(ValidationError::IncompleteGroup {
                declaration_id: declaration_id.clone(),
            }
            .into());
        }

        let amount = self.policy.total(&current);
        if amount <= 0 {
            return Err(ValidationError::InvalidAmount {
                declaration_id: declaration_id.clone(),
                amount,
            }
            .into());
        }

        if let Some(existing) = self.store.payment_for_declaration(declaration_id)? {
            if existing.status == PaymentStatus::Pending {
                return Err(ValidationError::PaymentAlreadyPending {
                    declaration_id: declaration_id.clone(),
                    payment_id: existing.id,
                }
                .into());
            }
        }

        let payment = self
            .store
            .create_payment(NewPayment {
                declaration_id: declaration_id.clone(),
                amount,
                method: self.method.clone(),
                description: format!(
                    "Payment for declaration {} ({} participants)",
                    group.declaration.code,
                    current.len()
                ),
                creator_id: actor.clone(),
            })
            .map_err(|source| DeclarationWorkflowError::PaymentCreation {
                declaration_id: declaration_id.clone(),
                source,
            })?;

        info!(
            payment_id = %payment.id,
            declaration_id = %declaration_id,
            amount,
            participants = current.len(),
            "payment created"
        );

        let mut warnings = Vec::new();
        let mut links = BatchOutcome::default();
        for participant in &current {
            let result = self
                .store
                .update_participant_payment_link(
                    &participant.id,
                    &payment.id,
                    PaymentStatus::Pending,
                    None,
                )
                .and_then(|()| {
                    if participant.status == ParticipantStatus::Draft {
                        self.store.update_participant_status(
                            &participant.id,
                            ParticipantStatus::Submitted,
                            actor,
                            Some("submitted with payment"),
                        )
                    } else {
                        Ok(())
                    }
                });

            match result {
                Ok(()) => links.record_success(participant.id.clone()),
                Err(err) => {
                    warn!(
                        participant_id = %participant.id,
                        payment_id = %payment.id,
                        error = %err,
                        "failed to link participant to payment"
                    );
                    links.record_failure(participant.id.clone(), err);
                }
            }
        }
        warnings.extend(links.warning("payment link"));

        let declaration_status = self.advance_declaration(
            declaration_id,
            DeclarationStatus::PendingPayment,
            actor,
            "payment created",
            &mut warnings,
        );

        self.publish(
            WorkflowEvent::new(EventKind::PaymentCreated)
                .with("payment_id", &payment.id)
                .with("declaration_id", declaration_id)
                .with("amount", payment.amount),
            &mut warnings,
        );

        Ok(PaymentReceipt {
            payment,
            links,
            declaration_status: declaration_status.unwrap_or(group.declaration.status),
            warnings,
        })
    }

    /// Propagate an externally confirmed settlement.
    ///
    /// Safe to repeat: an already completed payment keeps its settlement timestamp, and
    /// participants or declarations already past the target status are left alone.
    /// Every named participant must belong to `declaration_id` and be unlinked or linked to
    /// `payment_id`; otherwise nothing is written. When the payment itself cannot be marked
    /// completed, nothing else moves either.
    pub fn reconcile(
        &self,
        payment_id: &PaymentId,
        participant_ids: &[ParticipantId],
        declaration_id: &DeclarationId,
        actor: &UserId,
    ) -> Result<ReconciliationReport, DeclarationWorkflowError> {
        let payment = self
            .store
            .fetch_payment(payment_id)?
            .ok_or(RepositoryError::NotFound)?;
        if &payment.declaration_id != declaration_id {
            return Err(ValidationError::PaymentDeclarationMismatch {
                payment_id: payment_id.clone(),
                expected: payment.declaration_id,
                found: declaration_id.clone(),
            }
            .into());
        }

        let rows = self.store.participant_rows(participant_ids)?;
        for row in &rows {
            let participant = &row.participant;
            let foreign_link = participant
                .payment_id
                .as_ref()
                .is_some_and(|linked| linked != payment_id);
            if &participant.declaration_id != declaration_id || foreign_link {
                return Err(ValidationError::ParticipantNotCovered {
                    participant_id: participant.id.clone(),
                    payment_id: payment_id.clone(),
                }
                .into());
            }
        }

        let mut warnings = Vec::new();
        let already_settled = payment.status == PaymentStatus::Completed;
        let payment = if already_settled {
            payment
        } else {
            match self.store.complete_payment(payment_id, Utc::now()) {
                Ok(updated) => updated,
                Err(err) => {
                    warn!(payment_id = %payment_id, error = %err, "failed to mark payment completed");
                    warnings.push(format!("payment {payment_id} status not updated: {err}"));
                    // Participants and the declaration stay pending so a retry can finish.
                    let declaration_status = self
                        .store
                        .fetch_declaration(declaration_id)
                        .ok()
                        .flatten()
                        .map(|declaration| declaration.status);
                    return Ok(ReconciliationReport {
                        payment,
                        already_settled,
                        participants: BatchOutcome::default(),
                        synced_links: 0,
                        declaration_status,
                        warnings,
                    });
                }
            }
        };
        let settled_at = payment.settled_at.unwrap_or_else(Utc::now);

        let mut participants = BatchOutcome::default();
        for id in participant_ids {
            let Some(row) = rows.iter().find(|row| &row.participant.id == id) else {
                warn!(participant_id = %id, payment_id = %payment_id, "participant missing during reconciliation");
                participants.record_failure(id.clone(), RepositoryError::NotFound);
                continue;
            };

            let result = self
                .store
                .update_participant_payment_link(
                    id,
                    payment_id,
                    PaymentStatus::Completed,
                    Some(settled_at),
                )
                .and_then(|()| {
                    if row.participant.status == ParticipantStatus::Draft {
                        self.store.update_participant_status(
                            id,
                            ParticipantStatus::Submitted,
                            actor,
                            Some("payment confirmed"),
                        )
                    } else {
                        Ok(())
                    }
                });

            match result {
                Ok(()) => participants.record_success(id.clone()),
                Err(err) => {
                    warn!(participant_id = %id, payment_id = %payment_id, error = %err, "failed to propagate settlement to participant");
                    participants.record_failure(id.clone(), err);
                }
            }
        }
        warnings.extend(participants.warning("settlement propagation"));

        let synced_links = match self
            .store
            .update_payment_status_for_linked_participants(payment_id, PaymentStatus::Completed)
        {
            Ok(count) => count,
            Err(err) => {
                warn!(payment_id = %payment_id, error = %err, "failed to sync linked participants");
                warnings.push(format!("linked participants not synced: {err}"));
                0
            }
        };

        let declaration_status = self.advance_declaration(
            declaration_id,
            DeclarationStatus::Processing,
            actor,
            "payment confirmed",
            &mut warnings,
        );

        info!(
            payment_id = %payment_id,
            declaration_id = %declaration_id,
            already_settled,
            participants = participants.succeeded.len(),
            failed = participants.failed.len(),
            "payment reconciled"
        );

        self.publish(
            WorkflowEvent::new(EventKind::PaymentConfirmed)
                .with("payment_id", payment_id)
                .with("declaration_id", declaration_id),
            &mut warnings,
        );
        self.publish(
            WorkflowEvent::new(EventKind::RefreshUnprocessedView)
                .with("declaration_id", declaration_id),
            &mut warnings,
        );

        Ok(ReconciliationReport {
            payment,
            already_settled,
            participants,
            synced_links,
            declaration_status,
            warnings,
        })
    }

    /// Walk the declaration forward to `target`, one single-row update per edge.
    ///
    /// Returns the status reached, or `None` when the declaration could not be read.
    fn advance_declaration(
        &self,
        declaration_id: &DeclarationId,
        target: DeclarationStatus,
        actor: &UserId,
        note: &str,
        warnings: &mut Vec<String>,
    ) -> Option<DeclarationStatus> {
        let declaration = match self.store.fetch_declaration(declaration_id) {
            Ok(Some(declaration)) => declaration,
            Ok(None) => {
                warnings.push(format!("declaration {declaration_id} not found"));
                return None;
            }
            Err(err) => {
                warn!(declaration_id = %declaration_id, error = %err, "failed to load declaration");
                warnings.push(format!("declaration {declaration_id} not loaded: {err}"));
                return None;
            }
        };

        let Some(steps) = declaration.status.path_to(target) else {
            warn!(
                declaration_id = %declaration_id,
                from = declaration.status.label(),
                to = target.label(),
                "declaration status cannot move to target"
            );
            warnings.push(format!(
                "declaration {} stays {}: cannot move to {}",
                declaration.code,
                declaration.status.label(),
                target.label()
            ));
            return Some(declaration.status);
        };

        let mut reached = declaration.status;
        for step in steps {
            if let Err(err) = self
                .store
                .update_declaration_status(declaration_id, step, actor, Some(note))
            {
                warn!(declaration_id = %declaration_id, status = step.label(), error = %err, "failed to update declaration status");
                warnings.push(format!(
                    "declaration {} stays {}: {err}",
                    declaration.code,
                    reached.label()
                ));
                break;
            }
            reached = step;
        }

        if reached != declaration.status {
            self.publish(
                WorkflowEvent::new(EventKind::DeclarationStatusChanged)
                    .with("declaration_id", declaration_id)
                    .with("from", declaration.status.label())
                    .with("to", reached.label()),
                warnings,
            );
        }
        Some(reached)
    }

    fn publish(&self, event: WorkflowEvent, warnings: &mut Vec<String>) {
        let kind = event.kind;
        if let Err(err) = self.events.publish(event) {
            warn!(event = kind.label(), error = %err, "failed to publish workflow event");
            warnings.push(format!("{} not published: {err}", kind.label()));
        }
    }
}
