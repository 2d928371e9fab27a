use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    Declaration, DeclarationId, DeclarationStatus, NewDeclaration, NewPayment, Participant,
    ParticipantId, ParticipantRow, ParticipantStatus, Payment, PaymentId, PaymentStatus, UserId,
};
use super::repository::{DeclarationStore, ParticipantFilter, ParticipantPage, RepositoryError};

#[derive(Default)]
struct StoreState {
    declarations: BTreeMap<DeclarationId, Declaration>,
    participants: BTreeMap<ParticipantId, Participant>,
    payments: BTreeMap<PaymentId, Payment>,
}

/// Mutex-backed store used by the service binary, the demo, and tests.
#[derive(Default)]
pub struct InMemoryDeclarationStore {
    state: Mutex<StoreState>,
    sequence: AtomicU64,
}

impl InMemoryDeclarationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".to_string()))
    }

    fn next_id(&self, prefix: &str) -> String {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{id:06}")
    }

    /// Load an existing declaration row, e.g. when seeding fixtures.
    pub fn seed_declaration(&self, declaration: Declaration) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if state.declarations.contains_key(&declaration.id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .declarations
            .insert(declaration.id.clone(), declaration);
        Ok(())
    }

    pub fn seed_participant(&self, participant: Participant) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if !state.declarations.contains_key(&participant.declaration_id) {
            return Err(RepositoryError::NotFound);
        }
        if state.participants.contains_key(&participant.id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .participants
            .insert(participant.id.clone(), participant);
        Ok(())
    }

    pub fn participant(&self, id: &ParticipantId) -> Result<Option<Participant>, RepositoryError> {
        Ok(self.state()?.participants.get(id).cloned())
    }

    pub fn declarations(&self) -> Result<Vec<Declaration>, RepositoryError> {
        Ok(self.state()?.declarations.values().cloned().collect())
    }

    pub fn payments(&self) -> Result<Vec<Payment>, RepositoryError> {
        Ok(self.state()?.payments.values().cloned().collect())
    }
}

fn matches_filter(
    participant: &Participant,
    declaration: &Declaration,
    filter: &ParticipantFilter,
) -> bool {
    if participant.status.is_terminal() {
        return false;
    }
    if let Some(owner) = &filter.owner_id {
        if &declaration.owner_id != owner {
            return false;
        }
    }
    if let Some(status) = filter.participant_status {
        if participant.status != status {
            return false;
        }
    }
    if let Some(status) = filter.declaration_status {
        if declaration.status != status {
            return false;
        }
    }
    if let Some(code) = &filter.declaration_code {
        if !declaration
            .code
            .to_lowercase()
            .contains(&code.trim().to_lowercase())
        {
            return false;
        }
    }
    if let Some(unit) = &filter.unit_code {
        if declaration.unit_code.as_deref() != Some(unit.as_str()) {
            return false;
        }
    }
    if let Some(agency) = &filter.agency_code {
        if declaration.agency_code.as_deref() != Some(agency.as_str()) {
            return false;
        }
    }
    let created_on = declaration.created_at.date_naive();
    if filter.created_from.is_some_and(|from| created_on < from) {
        return false;
    }
    if filter.created_to.is_some_and(|to| created_on > to) {
        return false;
    }
    if let Some(search) = &filter.search {
        let needle = search.trim().to_lowercase();
        if !needle.is_empty() {
            let haystacks = [
                Some(participant.full_name.as_str()),
                participant.national_id.as_deref(),
                participant.insurance_id.as_deref(),
                Some(declaration.code.as_str()),
            ];
            if !haystacks
                .iter()
                .flatten()
                .any(|value| value.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
    }
    true
}

fn row(participant: &Participant, declaration: &Declaration) -> ParticipantRow {
    ParticipantRow {
        participant: participant.clone(),
        declaration: declaration.summary(),
    }
}

impl DeclarationStore for InMemoryDeclarationStore {
    fn list_unprocessed_participants(
        &self,
        filter: &ParticipantFilter,
    ) -> Result<ParticipantPage, RepositoryError> {
        let state = self.state()?;
        let mut matching: Vec<(&Declaration, &Participant)> = state
            .participants
            .values()
            .filter_map(|participant| {
                state
                    .declarations
                    .get(&participant.declaration_id)
                    .map(|declaration| (declaration, participant))
            })
            .filter(|(declaration, participant)| matches_filter(participant, declaration, filter))
            .collect();

        // Newest declarations first, participants by id within a declaration.
        matching.sort_by(|(left_decl, left), (right_decl, right)| {
            right_decl
                .created_at
                .cmp(&left_decl.created_at)
                .then_with(|| left_decl.code.cmp(&right_decl.code))
                .then_with(|| left.id.cmp(&right.id))
        });

        let total = matching.len();
        let limit = filter.limit.unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .map(|(declaration, participant)| row(participant, declaration))
            .collect();

        Ok(ParticipantPage { items, total })
    }

    fn participant_rows(
        &self,
        ids: &[ParticipantId],
    ) -> Result<Vec<ParticipantRow>, RepositoryError> {
        let state = self.state()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.participants.get(id))
            .filter_map(|participant| {
                state
                    .declarations
                    .get(&participant.declaration_id)
                    .map(|declaration| row(participant, declaration))
            })
            .collect())
    }

    fn fetch_declaration(
        &self,
        id: &DeclarationId,
    ) -> Result<Option<Declaration>, RepositoryError> {
        Ok(self.state()?.declarations.get(id).cloned())
    }

    fn declaration_by_code(&self, code: &str) -> Result<Option<Declaration>, RepositoryError> {
        Ok(self
            .state()?
            .declarations
            .values()
            .find(|declaration| declaration.code == code)
            .cloned())
    }

    fn participants_of(&self, id: &DeclarationId) -> Result<Vec<Participant>, RepositoryError> {
        Ok(self
            .state()?
            .participants
            .values()
            .filter(|participant| &participant.declaration_id == id)
            .cloned()
            .collect())
    }

    fn participants_linked_to(&self, id: &PaymentId) -> Result<Vec<Participant>, RepositoryError> {
        Ok(self
            .state()?
            .participants
            .values()
            .filter(|participant| participant.payment_id.as_ref() == Some(id))
            .cloned()
            .collect())
    }

    fn create_declaration(
        &self,
        declaration: NewDeclaration,
    ) -> Result<Declaration, RepositoryError> {
        let mut state = self.state()?;
        if state
            .declarations
            .values()
            .any(|existing| existing.code == declaration.code)
        {
            return Err(RepositoryError::Conflict);
        }
        if let Some(source) = &declaration.source_id {
            if !state.declarations.contains_key(source) {
                return Err(RepositoryError::NotFound);
            }
        }

        let record = Declaration {
            id: DeclarationId(self.next_id("decl")),
            code: declaration.code,
            name: declaration.name,
            kind: declaration.kind,
            status: declaration.status,
            created_at: Utc::now(),
            approved_at: None,
            owner_id: declaration.owner_id,
            unit_code: declaration.unit_code,
            agency_code: declaration.agency_code,
            parent_id: declaration.source_id,
            note: declaration.note,
        };
        state.declarations.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn reassign_participant(
        &self,
        id: &ParticipantId,
        declaration_id: &DeclarationId,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if !state.declarations.contains_key(declaration_id) {
            return Err(RepositoryError::NotFound);
        }
        let participant = state
            .participants
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        participant.declaration_id = declaration_id.clone();
        Ok(())
    }

    fn update_participant_status(
        &self,
        id: &ParticipantId,
        status: ParticipantStatus,
        _actor: &UserId,
        _note: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let participant = state
            .participants
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        if participant.status != status {
            participant.status = status;
            if status == ParticipantStatus::Submitted && participant.submitted_at.is_none() {
                participant.submitted_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    fn update_participant_payment_link(
        &self,
        id: &ParticipantId,
        payment_id: &PaymentId,
        status: PaymentStatus,
        settled_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if !state.payments.contains_key(payment_id) {
            return Err(RepositoryError::NotFound);
        }
        let participant = state
            .participants
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        participant.payment_id = Some(payment_id.clone());
        participant.payment_status = Some(status);
        if participant.settled_at.is_none() {
            participant.settled_at = settled_at;
        }
        Ok(())
    }

    fn update_declaration_status(
        &self,
        id: &DeclarationId,
        status: DeclarationStatus,
        _actor: &UserId,
        _note: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let declaration = state
            .declarations
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        declaration.status = status;
        Ok(())
    }

    fn create_payment(&self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        let mut state = self.state()?;
        if !state.declarations.contains_key(&payment.declaration_id) {
            return Err(RepositoryError::NotFound);
        }
        let record = Payment {
            id: PaymentId(self.next_id("pay")),
            declaration_id: payment.declaration_id,
            amount: payment.amount,
            method: payment.method,
            description: payment.description,
            creator_id: payment.creator_id,
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
            settled_at: None,
        };
        state.payments.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.state()?.payments.get(id).cloned())
    }

    fn payment_for_declaration(
        &self,
        id: &DeclarationId,
    ) -> Result<Option<Payment>, RepositoryError> {
        Ok(self
            .payments_for_declaration(id)?
            .into_iter()
            .max_by(|left, right| {
                left.created_at
                    .cmp(&right.created_at)
                    .then_with(|| left.id.cmp(&right.id))
            }))
    }

    fn payments_for_declaration(
        &self,
        id: &DeclarationId,
    ) -> Result<Vec<Payment>, RepositoryError> {
        Ok(self
            .state()?
            .payments
            .values()
            .filter(|payment| &payment.declaration_id == id)
            .cloned()
            .collect())
    }

    fn complete_payment(
        &self,
        id: &PaymentId,
        settled_at: DateTime<Utc>,
    ) -> Result<Payment, RepositoryError> {
        let mut state = self.state()?;
        let payment = state.payments.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if payment.status != PaymentStatus::Completed {
            payment.status = PaymentStatus::Completed;
            payment.settled_at = Some(settled_at);
        }
        Ok(payment.clone())
    }

    fn update_payment_status_for_linked_participants(
        &self,
        id: &PaymentId,
        status: PaymentStatus,
    ) -> Result<usize, RepositoryError> {
        let mut state = self.state()?;
        let settled_at = state
            .payments
            .get(id)
            .ok_or(RepositoryError::NotFound)?
            .settled_at;
        let mut updated = 0;
        for participant in state
            .participants
            .values_mut()
            .filter(|participant| participant.payment_id.as_ref() == Some(id))
        {
            if participant.payment_status != Some(status) {
                participant.payment_status = Some(status);
                if status == PaymentStatus::Completed && participant.settled_at.is_none() {
                    participant.settled_at = settled_at;
                }
                updated += 1;
            }
        }
        Ok(updated)
    }
}
