//! Derived classification of a loaded participant page into selection buckets.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::contribution::ContributionPolicy;
use super::domain::{DeclarationId, DeclarationStatus, ParticipantId, ParticipantRow, ParticipantStatus};
use super::planner::ValidationError;

/// Disjoint classification of a participant row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Draft,
    Submitted,
    PendingPayment,
    Processing,
}

impl Bucket {
    pub const fn label(self) -> &'static str {
        match self {
            Bucket::Draft => "draft",
            Bucket::Submitted => "submitted",
            Bucket::PendingPayment => "pending_payment",
            Bucket::Processing => "processing",
        }
    }

    /// Buckets reachable through the generic checkbox selection.
    pub const fn is_selectable(self) -> bool {
        matches!(self, Bucket::Draft | Bucket::PendingPayment)
    }
}

/// Bucket for one row. A pending-payment declaration wins over any participant status so that
/// every row lands in exactly one bucket.
pub fn classify(row: &ParticipantRow) -> Bucket {
    match (row.declaration.status, row.participant.status) {
        (DeclarationStatus::PendingPayment, _) => Bucket::PendingPayment,
        (DeclarationStatus::Processing, _) => Bucket::Processing,
        (_, ParticipantStatus::Draft) => Bucket::Draft,
        (_, ParticipantStatus::Submitted) => Bucket::Submitted,
        _ => Bucket::Processing,
    }
}

/// Bucket membership for a page of rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketIndex {
    membership: BTreeMap<ParticipantId, Bucket>,
    declarations: BTreeMap<ParticipantId, DeclarationId>,
}

impl BucketIndex {
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a ParticipantRow>,
    {
        let mut index = Self::default();
        for row in rows {
            let id = row.participant.id.clone();
            index
                .declarations
                .insert(id.clone(), row.participant.declaration_id.clone());
            index.membership.insert(id, classify(row));
        }
        index
    }

    pub fn bucket_of(&self, id: &ParticipantId) -> Option<Bucket> {
        self.membership.get(id).copied()
    }

    /// Cached declaration reference for a loaded participant.
    pub fn declaration_of(&self, id: &ParticipantId) -> Option<&DeclarationId> {
        self.declarations.get(id)
    }

    pub fn members(&self, bucket: Bucket) -> impl Iterator<Item = &ParticipantId> + '_ {
        self.membership
            .iter()
            .filter(move |(_, member)| **member == bucket)
            .map(|(id, _)| id)
    }

    pub fn selectable(&self) -> impl Iterator<Item = &ParticipantId> + '_ {
        self.membership
            .iter()
            .filter(|(_, bucket)| bucket.is_selectable())
            .map(|(id, _)| id)
    }

    pub fn is_selectable(&self, id: &ParticipantId) -> bool {
        self.bucket_of(id).is_some_and(Bucket::is_selectable)
    }

    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    pub fn summary(&self) -> BucketSummary {
        let mut summary = BucketSummary::default();
        for bucket in self.membership.values() {
            match bucket {
                Bucket::Draft => summary.draft += 1,
                Bucket::Submitted => summary.submitted += 1,
                Bucket::PendingPayment => summary.pending_payment += 1,
                Bucket::Processing => summary.processing += 1,
            }
        }
        summary
    }
}

/// Per-bucket counts for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketSummary {
    pub draft: usize,
    pub submitted: usize,
    pub pending_payment: usize,
    pub processing: usize,
}

/// Checkbox state over the currently loaded page.
///
/// Buckets are recomputed from scratch on every [`SelectionEngine::reload`]; selection only ever
/// holds members of the selectable set.
#[derive(Debug, Clone, Default)]
pub struct SelectionEngine {
    rows: BTreeMap<ParticipantId, ParticipantRow>,
    buckets: BucketIndex,
    selected: BTreeSet<ParticipantId>,
}

impl SelectionEngine {
    pub fn new(rows: Vec<ParticipantRow>) -> Self {
        let mut engine = Self::default();
        engine.reload(rows);
        engine
    }

    /// Replace the loaded page. Selected ids that are no longer selectable are dropped.
    pub fn reload(&mut self, rows: Vec<ParticipantRow>) {
        self.buckets = BucketIndex::from_rows(&rows);
        self.rows = rows
            .into_iter()
            .map(|row| (row.participant.id.clone(), row))
            .collect();
        let buckets = &self.buckets;
        self.selected.retain(|id| buckets.is_selectable(id));
    }

    pub fn buckets(&self) -> &BucketIndex {
        &self.buckets
    }

    pub fn rows(&self) -> impl Iterator<Item = &ParticipantRow> + '_ {
        self.rows.values()
    }

    pub fn selected(&self) -> &BTreeSet<ParticipantId> {
        &self.selected
    }

    /// Flip membership of one participant; returns whether it is now selected.
    pub fn toggle(&mut self, id: &ParticipantId) -> Result<bool, ValidationError> {
        match self.buckets.bucket_of(id) {
            None => Err(ValidationError::UnknownParticipant {
                participant_id: id.clone(),
            }),
            Some(bucket) if !bucket.is_selectable() => Err(ValidationError::NotSelectable {
                participant_id: id.clone(),
                bucket,
            }),
            Some(_) => {
                if self.selected.remove(id) {
                    Ok(false)
                } else {
                    self.selected.insert(id.clone());
                    Ok(true)
                }
            }
        }
    }

    pub fn select_all(&mut self) {
        let selectable: Vec<ParticipantId> = self.buckets.selectable().cloned().collect();
        self.selected.extend(selectable);
    }

    pub fn deselect_all(&mut self) {
        let buckets = &self.buckets;
        self.selected.retain(|id| !buckets.is_selectable(id));
    }

    pub fn all_selected(&self) -> bool {
        let mut selectable = self.buckets.selectable().peekable();
        selectable.peek().is_some() && selectable.all(|id| self.selected.contains(id))
    }

    /// Submitted members of one declaration, for the dedicated pay-for-submitted action.
    pub fn submitted_of(&self, declaration_id: &DeclarationId) -> BTreeSet<ParticipantId> {
        self.buckets
            .members(Bucket::Submitted)
            .filter(|id| self.buckets.declaration_of(id) == Some(declaration_id))
            .cloned()
            .collect()
    }

    /// Display total over the current selection. Billing recomputes from fresh rows at commit.
    pub fn selected_total(&self, policy: ContributionPolicy) -> i64 {
        policy.total(
            self.selected
                .iter()
                .filter_map(|id| self.rows.get(id))
                .map(|row| &row.participant),
        )
    }
}
