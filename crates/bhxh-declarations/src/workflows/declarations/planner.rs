use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::contribution::ContributionPolicy;
use super::domain::{
    Declaration, DeclarationId, DeclarationStatus, NewDeclaration, Participant, ParticipantId,
    PaymentId, UserId,
};
use super::outcome::BatchOutcome;
use super::repository::{DeclarationStore, RepositoryError};
use super::selection::{Bucket, BucketIndex};
use super::service::DeclarationWorkflowError;

/// Action path implied by a homogeneous selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPath {
    /// Draft participants: submit and create a payment.
    SubmitAndPay,
    /// Already submitted participants: create the missing payment.
    PayForSubmitted,
    /// Participants awaiting payment: show the existing payment, no state change.
    ViewPayment,
}

impl SubmissionPath {
    pub const fn label(self) -> &'static str {
        match self {
            SubmissionPath::SubmitAndPay => "submit_and_pay",
            SubmissionPath::PayForSubmitted => "pay_for_submitted",
            SubmissionPath::ViewPayment => "view_payment",
        }
    }
}

fn bucket_labels(buckets: &[Bucket]) -> String {
    buckets
        .iter()
        .map(|bucket| bucket.label())
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Input rejected before any mutation reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no participants selected")]
    EmptySelection,
    #[error("participant {participant_id} is not in the loaded page")]
    UnknownParticipant { participant_id: ParticipantId },
    #[error("participant {participant_id} is {} and cannot be selected", .bucket.label())]
    NotSelectable {
        participant_id: ParticipantId,
        bucket: Bucket,
    },
    #[error("selection mixes {} participants; act on one kind at a time", bucket_labels(.buckets))]
    MixedSelection { buckets: Vec<Bucket> },
    #[error("{} selections cannot use the {} action", .found.label(), .expected.label())]
    WrongAction {
        expected: SubmissionPath,
        found: SubmissionPath,
    },
    #[error("selection spans {count} declarations; pick participants of a single declaration")]
    MultipleDeclarations { count: usize },
    #[error("declaration {declaration_id} not found")]
    UnknownDeclaration { declaration_id: DeclarationId },
    #[error("participant {participant_id} no longer belongs to declaration {declaration_id}; reload and retry")]
    StaleSelection {
        participant_id: ParticipantId,
        declaration_id: DeclarationId,
    },
    #[error("invalid amount {amount} for declaration {declaration_id}")]
    InvalidAmount {
        declaration_id: DeclarationId,
        amount: i64,
    },
    #[error("declaration {declaration_id} already awaits payment {payment_id}")]
    PaymentAlreadyPending {
        declaration_id: DeclarationId,
        payment_id: PaymentId,
    },
    #[error("billing group does not match the participants of declaration {declaration_id}")]
    IncompleteGroup { declaration_id: DeclarationId },
    #[error("participant {participant_id} is not covered by payment {payment_id}")]
    ParticipantNotCovered {
        participant_id: ParticipantId,
        payment_id: PaymentId,
    },
    #[error("payment {payment_id} belongs to declaration {expected}, not {found}")]
    PaymentDeclarationMismatch {
        payment_id: PaymentId,
        expected: DeclarationId,
        found: DeclarationId,
    },
}

/// Decide which path a selection takes. Mixed selections are rejected outright.
pub fn classify_selection(
    selection: &BTreeSet<ParticipantId>,
    buckets: &BucketIndex,
) -> Result<SubmissionPath, ValidationError> {
    if selection.is_empty() {
        return Err(ValidationError::EmptySelection);
    }

    let mut seen = BTreeSet::new();
    for id in selection {
        match buckets.bucket_of(id) {
            None => {
                return Err(ValidationError::UnknownParticipant {
                    participant_id: id.clone(),
                })
            }
            Some(Bucket::Processing) => {
                return Err(ValidationError::NotSelectable {
                    participant_id: id.clone(),
                    bucket: Bucket::Processing,
                })
            }
            Some(bucket) => {
                seen.insert(bucket);
            }
        }
    }

    let buckets: Vec<Bucket> = seen.into_iter().collect();
    match buckets.as_slice() {
        [Bucket::Draft] => Ok(SubmissionPath::SubmitAndPay),
        [Bucket::Submitted] => Ok(SubmissionPath::PayForSubmitted),
        [Bucket::PendingPayment] => Ok(SubmissionPath::ViewPayment),
        _ => Err(ValidationError::MixedSelection { buckets }),
    }
}

/// Per-declaration slice of a selection, validated against current store rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub declaration: Declaration,
    pub selected: Vec<Participant>,
    pub remaining: Vec<Participant>,
    pub amount: i64,
}

impl GroupPlan {
    pub fn is_full_match(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Where a billing group's declaration came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupOrigin {
    Direct,
    Split { parent_id: DeclarationId },
}

/// A declaration together with its complete participant set, ready to bill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingGroup {
    pub declaration: Declaration,
    pub participants: Vec<Participant>,
    pub origin: GroupOrigin,
}

/// Error raised while forking a strict subset into its own declaration.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("could not create split declaration from {parent_code}: {source}")]
    DeclarationCreation {
        parent_code: String,
        #[source]
        source: RepositoryError,
    },
    #[error(
        "split declaration {declaration_code} is incomplete: {} of {} participants not moved",
        .outcome.failed.len(),
        .outcome.attempted()
    )]
    IncompleteReassignment {
        declaration_id: DeclarationId,
        declaration_code: String,
        outcome: BatchOutcome,
    },
}

const MAX_SPLIT_CODE_ATTEMPTS: usize = 100;

/// Decides between direct billing and a declaration split, and performs the split.
pub struct SubmissionPlanner<S> {
    store: Arc<S>,
    policy: ContributionPolicy,
    split_suffix: String,
}

impl<S> SubmissionPlanner<S>
where
    S: DeclarationStore + 'static,
{
    pub fn new(store: Arc<S>, policy: ContributionPolicy, split_suffix: impl Into<String>) -> Self {
        Self {
            store,
            policy,
            split_suffix: split_suffix.into(),
        }
    }

    /// Group the selection by cached declaration and validate every group against fresh rows.
    ///
    /// Nothing is written; any validation error aborts the whole batch.
    pub fn plan(
        &self,
        selection: &BTreeSet<ParticipantId>,
        buckets: &BucketIndex,
    ) -> Result<Vec<GroupPlan>, DeclarationWorkflowError> {
        if selection.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        let mut groups: BTreeMap<DeclarationId, BTreeSet<ParticipantId>> = BTreeMap::new();
        for id in selection {
            let declaration_id =
                buckets
                    .declaration_of(id)
                    .ok_or_else(|| ValidationError::UnknownParticipant {
                        participant_id: id.clone(),
                    })?;
            groups
                .entry(declaration_id.clone())
                .or_default()
                .insert(id.clone());
        }

        let mut plans = Vec::with_capacity(groups.len());
        for (declaration_id, ids) in groups {
            let declaration = self.store.fetch_declaration(&declaration_id)?.ok_or_else(|| {
                ValidationError::UnknownDeclaration {
                    declaration_id: declaration_id.clone(),
                }
            })?;
            let current = self.store.participants_of(&declaration_id)?;

            if let Some(missing) = ids
                .iter()
                .find(|id| !current.iter().any(|participant| &participant.id == *id))
            {
                return Err(ValidationError::StaleSelection {
                    participant_id: missing.clone(),
                    declaration_id,
                }
                .into());
            }

            let (selected, remaining): (Vec<Participant>, Vec<Participant>) = current
                .into_iter()
                .partition(|participant| ids.contains(&participant.id));
            let amount = self.policy.total(&selected);
            if amount <= 0 {
                return Err(ValidationError::InvalidAmount {
                    declaration_id,
                    amount,
                }
                .into());
            }

            plans.push(GroupPlan {
                declaration,
                selected,
                remaining,
                amount,
            });
        }

        Ok(plans)
    }

    /// Turn a validated plan into a billing group, splitting when the selection is a strict subset.
    pub fn commit(&self, plan: GroupPlan, actor: &UserId) -> Result<BillingGroup, SplitError> {
        if plan.is_full_match() {
            info!(
                declaration_id = %plan.declaration.id,
                participants = plan.selected.len(),
                "selection covers the whole declaration; billing directly"
            );
            return Ok(BillingGroup {
                declaration: plan.declaration,
                participants: plan.selected,
                origin: GroupOrigin::Direct,
            });
        }

        let outcome = self.split(&plan.declaration, &plan.selected, actor)?;
        Ok(BillingGroup {
            declaration: outcome.declaration,
            participants: outcome.moved,
            origin: GroupOrigin::Split {
                parent_id: plan.declaration.id,
            },
        })
    }

    /// Fork `selected` off `parent` into a new submitted declaration.
    ///
    /// Re-pointing runs row by row; any failed row leaves the new declaration incomplete and
    /// is reported so no payment is created against it.
    pub fn split(
        &self,
        parent: &Declaration,
        selected: &[Participant],
        actor: &UserId,
    ) -> Result<SplitOutcome, SplitError> {
        let creation_error = |source| SplitError::DeclarationCreation {
            parent_code: parent.code.clone(),
            source,
        };

        let code = self.split_code(&parent.code).map_err(creation_error)?;
        let total = self
            .store
            .participants_of(&parent.id)
            .map(|participants| participants.len())
            .map_err(creation_error)?;
        let note = format!(
            "Split from {} with {} of {} participants",
            parent.code,
            selected.len(),
            total
        );

        let declaration = self
            .store
            .create_declaration(NewDeclaration {
                source_id: Some(parent.id.clone()),
                code,
                name: parent.name.clone(),
                kind: parent.kind.clone(),
                status: DeclarationStatus::Submitted,
                owner_id: parent.owner_id.clone(),
                unit_code: parent.unit_code.clone(),
                agency_code: parent.agency_code.clone(),
                note: Some(note),
            })
            .map_err(creation_error)?;

        info!(
            parent_id = %parent.id,
            declaration_id = %declaration.id,
            code = %declaration.code,
            actor = %actor,
            "created split declaration"
        );

        let mut outcome = BatchOutcome::default();
        let mut moved = Vec::with_capacity(selected.len());
        for participant in selected {
            match self
                .store
                .reassign_participant(&participant.id, &declaration.id)
            {
                Ok(()) => {
                    outcome.record_success(participant.id.clone());
                    let mut participant = participant.clone();
                    participant.declaration_id = declaration.id.clone();
                    moved.push(participant);
                }
                Err(err) => {
                    warn!(
                        participant_id = %participant.id,
                        declaration_id = %declaration.id,
                        error = %err,
                        "failed to move participant into split declaration"
                    );
                    outcome.record_failure(participant.id.clone(), err);
                }
            }
        }

        if !outcome.is_complete() {
            return Err(SplitError::IncompleteReassignment {
                declaration_id: declaration.id,
                declaration_code: declaration.code,
                outcome,
            });
        }

        Ok(SplitOutcome { declaration, moved })
    }

    fn split_code(&self, parent_code: &str) -> Result<String, RepositoryError> {
        let base = format!("{parent_code}-{}", self.split_suffix);
        for attempt in 1..=MAX_SPLIT_CODE_ATTEMPTS {
            let candidate = if attempt == 1 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            if self.store.declaration_by_code(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        Err(RepositoryError::Conflict)
    }
}

/// New declaration produced by a split and the participants now attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub declaration: Declaration,
    pub moved: Vec<Participant>,
}
