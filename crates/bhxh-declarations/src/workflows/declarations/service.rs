use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::domain::{DeclarationId, ParticipantId, ParticipantRow, Payment, PaymentId, UserId};
use super::events::{EventBus, EventKind, WorkflowEvent};
use super::outcome::BatchOutcome;
use super::payment::{PaymentOrchestrator, PaymentReceipt, ReconciliationReport};
use super::planner::{
    classify_selection, GroupOrigin, SplitError, SubmissionPath, SubmissionPlanner,
    ValidationError,
};
use super::repository::{DeclarationStore, ParticipantFilter, RepositoryError};
use super::selection::{BucketIndex, BucketSummary, SelectionEngine};
use super::status::{reconcile_statuses, StatusInconsistency};
use crate::config::WorkflowConfig;

/// Error raised by the unprocessed-records workflow.
#[derive(Debug, thiserror::Error)]
pub enum DeclarationWorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error("payment creation failed for declaration {declaration_id}: {source}")]
    PaymentCreation {
        declaration_id: DeclarationId,
        #[source]
        source: RepositoryError,
    },
}

/// Loaded page with derived bucket counts.
#[derive(Debug, Clone, Serialize)]
pub struct UnprocessedPage {
    pub items: Vec<ParticipantRow>,
    pub total: usize,
    pub buckets: BucketSummary,
}

/// Outcome of a submit or pay action.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub path: SubmissionPath,
    pub groups: Vec<GroupReport>,
    /// Existing payment shown for pending-payment selections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    pub warnings: Vec<String>,
}

impl SubmissionReport {
    pub fn billed(&self) -> impl Iterator<Item = &PaymentReceipt> + '_ {
        self.groups.iter().filter_map(|group| match &group.outcome {
            GroupOutcome::Billed { receipt, .. } => Some(receipt),
            GroupOutcome::Failed { .. } => None,
        })
    }

    pub fn failed_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|group| matches!(group.outcome, GroupOutcome::Failed { .. }))
            .count()
    }
}

/// Per-declaration result within a submission.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub source_declaration_id: DeclarationId,
    pub outcome: GroupOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupOutcome {
    Billed {
        declaration_id: DeclarationId,
        origin: GroupOrigin,
        receipt: PaymentReceipt,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        unmoved: Option<BatchOutcome>,
    },
}

/// Top-level action handler for the unprocessed-records screen.
pub struct UnprocessedRecordsService<S, E> {
    store: Arc<S>,
    events: Arc<E>,
    planner: SubmissionPlanner<S>,
    orchestrator: PaymentOrchestrator<S, E>,
    config: WorkflowConfig,
}

impl<S, E> UnprocessedRecordsService<S, E>
where
    S: DeclarationStore + 'static,
    E: EventBus + 'static,
{
    pub fn new(store: Arc<S>, events: Arc<E>, config: WorkflowConfig) -> Self {
        let planner = SubmissionPlanner::new(
            store.clone(),
            config.contribution_policy,
            config.split_suffix.clone(),
        );
        let orchestrator = PaymentOrchestrator::new(
            store.clone(),
            events.clone(),
            config.contribution_policy,
            config.payment_method.clone(),
        );
        Self {
            store,
            events,
            planner,
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn planner(&self) -> &SubmissionPlanner<S> {
        &self.planner
    }

    pub fn orchestrator(&self) -> &PaymentOrchestrator<S, E> {
        &self.orchestrator
    }

    pub fn load_page(&self, filter: &ParticipantFilter) -> Result<UnprocessedPage, DeclarationWorkflowError> {
        let page = self.store.list_unprocessed_participants(filter)?;
        let buckets = BucketIndex::from_rows(&page.items).summary();
        Ok(UnprocessedPage {
            items: page.items,
            total: page.total,
            buckets,
        })
    }

    /// Fresh selection state for a page; callers reload it after every action.
    pub fn selection_engine(
        &self,
        filter: &ParticipantFilter,
    ) -> Result<SelectionEngine, DeclarationWorkflowError> {
        let page = self.store.list_unprocessed_participants(filter)?;
        Ok(SelectionEngine::new(page.items))
    }

    /// Generic checkbox action: submit-and-pay for drafts, show the payment for pending rows.
    pub fn submit_selection(
        &self,
        selection: &BTreeSet<ParticipantId>,
        actor: &UserId,
    ) -> Result<SubmissionReport, DeclarationWorkflowError> {
        let buckets = self.current_buckets(selection)?;
        match classify_selection(selection, &buckets)? {
            SubmissionPath::SubmitAndPay => {
                self.bill(SubmissionPath::SubmitAndPay, selection, &buckets, actor)
            }
            SubmissionPath::ViewPayment => self.view_selected_payment(selection, &buckets),
            found @ SubmissionPath::PayForSubmitted => Err(ValidationError::WrongAction {
                expected: SubmissionPath::SubmitAndPay,
                found,
            }
            .into()),
        }
    }

    /// Dedicated action creating the payment for already submitted participants.
    pub fn pay_submitted(
        &self,
        selection: &BTreeSet<ParticipantId>,
        actor: &UserId,
    ) -> Result<SubmissionReport, DeclarationWorkflowError> {
        let buckets = self.current_buckets(selection)?;
        match classify_selection(selection, &buckets)? {
            SubmissionPath::PayForSubmitted => {
                self.bill(SubmissionPath::PayForSubmitted, selection, &buckets, actor)
            }
            found => Err(ValidationError::WrongAction {
                expected: SubmissionPath::PayForSubmitted,
                found,
            }
            .into()),
        }
    }

    pub fn view_payment(
        &self,
        declaration_id: &DeclarationId,
    ) -> Result<Payment, DeclarationWorkflowError> {
        let payment = self
            .store
            .payment_for_declaration(declaration_id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(payment)
    }

    /// Reconcile a payment after external confirmation. Without explicit ids every participant
    /// linked to the payment is reconciled.
    pub fn confirm_payment(
        &self,
        payment_id: &PaymentId,
        participant_ids: Option<Vec<ParticipantId>>,
        actor: &UserId,
    ) -> Result<ReconciliationReport, DeclarationWorkflowError> {
        let payment = self
            .store
            .fetch_payment(payment_id)?
            .ok_or(RepositoryError::NotFound)?;
        let participant_ids = match participant_ids {
            Some(ids) => ids,
            None => self
                .store
                .participants_linked_to(payment_id)?
                .into_iter()
                .map(|participant| participant.id)
                .collect(),
        };

        self.orchestrator
            .reconcile(payment_id, &participant_ids, &payment.declaration_id, actor)
    }

    /// Recompute status invariants for a declaration from its stored rows.
    pub fn check_consistency(
        &self,
        declaration_id: &DeclarationId,
    ) -> Result<Vec<StatusInconsistency>, DeclarationWorkflowError> {
        let declaration = self
            .store
            .fetch_declaration(declaration_id)?
            .ok_or(RepositoryError::NotFound)?;
        let participants = self.store.participants_of(declaration_id)?;
        let payments = self.store.payments_for_declaration(declaration_id)?;
        Ok(reconcile_statuses(
            &declaration,
            &participants,
            &payments,
            self.config.contribution_policy,
        ))
    }

    fn current_buckets(
        &self,
        selection: &BTreeSet<ParticipantId>,
    ) -> Result<BucketIndex, DeclarationWorkflowError> {
        let ids: Vec<ParticipantId> = selection.iter().cloned().collect();
        let rows = self.store.participant_rows(&ids)?;
        Ok(BucketIndex::from_rows(&rows))
    }

    fn bill(
        &self,
        path: SubmissionPath,
        selection: &BTreeSet<ParticipantId>,
        buckets: &BucketIndex,
        actor: &UserId,
    ) -> Result<SubmissionReport, DeclarationWorkflowError> {
        let plans = self.planner.plan(selection, buckets)?;
        let mut report = SubmissionReport {
            path,
            groups: Vec::with_capacity(plans.len()),
            payment: None,
            warnings: Vec::new(),
        };

        for plan in plans {
            let source_declaration_id = plan.declaration.id.clone();
            let outcome = match self.planner.commit(plan, actor) {
                Err(err) => {
                    warn!(declaration_id = %source_declaration_id, error = %err, "split aborted; no payment created");
                    let unmoved = match &err {
                        SplitError::IncompleteReassignment { outcome, .. } => Some(outcome.clone()),
                        SplitError::DeclarationCreation { .. } => None,
                    };
                    report.warnings.push(err.to_string());
                    GroupOutcome::Failed {
                        error: err.to_string(),
                        unmoved,
                    }
                }
                Ok(group) => match self.orchestrator.create_for_selection(&group, actor) {
                    Ok(receipt) => {
                        report.warnings.extend(receipt.warnings.iter().cloned());
                        GroupOutcome::Billed {
                            declaration_id: group.declaration.id.clone(),
                            origin: group.origin.clone(),
                            receipt,
                        }
                    }
                    Err(err) => {
                        warn!(declaration_id = %group.declaration.id, error = %err, "payment not created");
                        report.warnings.push(err.to_string());
                        GroupOutcome::Failed {
                            error: err.to_string(),
                            unmoved: None,
                        }
                    }
                },
            };
            report.groups.push(GroupReport {
                source_declaration_id,
                outcome,
            });
        }

        info!(
            path = path.label(),
            groups = report.groups.len(),
            failed = report.failed_groups(),
            "selection billed"
        );

        let refresh = WorkflowEvent::new(EventKind::RefreshUnprocessedView).with("actor", actor);
        if let Err(err) = self.events.publish(refresh) {
            warn!(error = %err, "failed to publish refresh event");
            report.warnings.push(format!("refresh not published: {err}"));
        }

        Ok(report)
    }

    fn view_selected_payment(
        &self,
        selection: &BTreeSet<ParticipantId>,
        buckets: &BucketIndex,
    ) -> Result<SubmissionReport, DeclarationWorkflowError> {
        let declarations: BTreeSet<&DeclarationId> = selection
            .iter()
            .filter_map(|id| buckets.declaration_of(id))
            .collect();
        let declaration_id = match declarations.into_iter().collect::<Vec<_>>().as_slice() {
            [single] => (*single).clone(),
            others => {
                return Err(ValidationError::MultipleDeclarations {
                    count: others.len(),
                }
                .into())
            }
        };

        let payment = self.view_payment(&declaration_id)?;
        Ok(SubmissionReport {
            path: SubmissionPath::ViewPayment,
            groups: Vec::new(),
            payment: Some(payment),
            warnings: Vec::new(),
        })
    }
}
