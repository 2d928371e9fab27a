use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::WorkflowConfig;
use crate::workflows::declarations::domain::{
    Declaration, DeclarationId, DeclarationStatus, NewDeclaration, NewPayment, Participant,
    ParticipantId, ParticipantRow, ParticipantStatus, Payment, PaymentId, PaymentStatus, UserId,
};
use crate::workflows::declarations::events::InMemoryEventBus;
use crate::workflows::declarations::memory::InMemoryDeclarationStore;
use crate::workflows::declarations::repository::{
    DeclarationStore, ParticipantFilter, ParticipantPage, RepositoryError,
};
use crate::workflows::declarations::service::UnprocessedRecordsService;

pub(super) fn actor() -> UserId {
    UserId("agent-01".to_string())
}

pub(super) fn pid(value: &str) -> ParticipantId {
    ParticipantId(value.to_string())
}

pub(super) fn did(value: &str) -> DeclarationId {
    DeclarationId(value.to_string())
}

pub(super) fn selection(values: &[&str]) -> BTreeSet<ParticipantId> {
    values.iter().map(|value| pid(value)).collect()
}

pub(super) fn created_at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn declaration(id: &str, code: &str, status: DeclarationStatus) -> Declaration {
    Declaration {
        id: did(id),
        code: code.to_string(),
        name: format!("Declaration {code}"),
        kind: "tang_moi".to_string(),
        status,
        created_at: created_at(1),
        approved_at: None,
        owner_id: actor(),
        unit_code: Some("DV-HN-01".to_string()),
        agency_code: Some("BHXH-HN".to_string()),
        parent_id: None,
        note: None,
    }
}

pub(super) fn participant(
    id: &str,
    declaration_id: &str,
    amount: Option<i64>,
    status: ParticipantStatus,
) -> Participant {
    Participant {
        id: pid(id),
        declaration_id: did(declaration_id),
        full_name: format!("Nguyen Van {id}"),
        national_id: Some(format!("0010{id}")),
        insurance_id: None,
        contribution: amount,
        secondary_contribution: None,
        status,
        payment_status: None,
        payment_id: None,
        submitted_at: None,
        settled_at: None,
    }
}

/// KK001: three drafts (100/200/300). KK002: one submitted participant (400).
pub(super) fn seeded_store() -> InMemoryDeclarationStore {
    let store = InMemoryDeclarationStore::new();
    store
        .seed_declaration(declaration("d-kk001", "KK001", DeclarationStatus::Draft))
        .expect("seed KK001");
    store
        .seed_declaration(declaration("d-kk002", "KK002", DeclarationStatus::Submitted))
        .expect("seed KK002");
    for (id, amount) in [("p-1", 100), ("p-2", 200), ("p-3", 300)] {
        store
            .seed_participant(participant(id, "d-kk001", Some(amount), ParticipantStatus::Draft))
            .expect("seed KK001 participant");
    }
    store
        .seed_participant(participant(
            "p-4",
            "d-kk002",
            Some(400),
            ParticipantStatus::Submitted,
        ))
        .expect("seed KK002 participant");
    store
}

pub(super) fn workflow_config() -> WorkflowConfig {
    WorkflowConfig::default()
}

pub(super) type TestService = UnprocessedRecordsService<ScriptedStore, InMemoryEventBus>;

pub(super) fn build_service() -> (TestService, Arc<ScriptedStore>, Arc<InMemoryEventBus>) {
    build_service_with(ScriptedStore::new(seeded_store()))
}

pub(super) fn build_service_with(
    store: ScriptedStore,
) -> (TestService, Arc<ScriptedStore>, Arc<InMemoryEventBus>) {
    let store = Arc::new(store);
    let events = Arc::new(InMemoryEventBus::new());
    let service = UnprocessedRecordsService::new(store.clone(), events.clone(), workflow_config());
    (service, store, events)
}

/// Store wrapper that counts mutations and fails scripted rows.
#[derive(Default)]
pub(super) struct ScriptedStore {
    pub(super) inner: InMemoryDeclarationStore,
    mutations: AtomicUsize,
    fail_reassign: Mutex<BTreeSet<ParticipantId>>,
    fail_links: Mutex<BTreeSet<ParticipantId>>,
    fail_create_declaration: AtomicBool,
    fail_create_payment: AtomicBool,
    fail_complete_payment: AtomicBool,
    fail_member_reads: AtomicBool,
}

impl ScriptedStore {
    pub(super) fn new(inner: InMemoryDeclarationStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub(super) fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub(super) fn fail_reassign_of(&self, id: &str) {
        self.fail_reassign
            .lock()
            .expect("script mutex poisoned")
            .insert(pid(id));
    }

    pub(super) fn fail_links_of(&self, id: &str) {
        self.fail_links
            .lock()
            .expect("script mutex poisoned")
            .insert(pid(id));
    }

    pub(super) fn clear_link_failures(&self) {
        self.fail_links.lock().expect("script mutex poisoned").clear();
    }

    pub(super) fn fail_declaration_creation(&self) {
        self.fail_create_declaration.store(true, Ordering::SeqCst);
    }

    pub(super) fn fail_payment_creation(&self) {
        self.fail_create_payment.store(true, Ordering::SeqCst);
    }

    pub(super) fn fail_payment_completion(&self, fail: bool) {
        self.fail_complete_payment.store(fail, Ordering::SeqCst);
    }

    pub(super) fn fail_member_reads(&self) {
        self.fail_member_reads.store(true, Ordering::SeqCst);
    }

    pub(super) fn participant(&self, id: &str) -> Participant {
        self.inner
            .participant(&pid(id))
            .expect("store readable")
            .expect("participant present")
    }

    pub(super) fn declaration(&self, id: &DeclarationId) -> Declaration {
        self.inner
            .fetch_declaration(id)
            .expect("store readable")
            .expect("declaration present")
    }

    fn mutate(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn offline() -> RepositoryError {
        RepositoryError::Unavailable("scripted failure".to_string())
    }
}

impl DeclarationStore for ScriptedStore {
    fn list_unprocessed_participants(
        &self,
        filter: &ParticipantFilter,
    ) -> Result<ParticipantPage, RepositoryError> {
        self.inner.list_unprocessed_participants(filter)
    }

    fn participant_rows(
        &self,
        ids: &[ParticipantId],
    ) -> Result<Vec<ParticipantRow>, RepositoryError> {
        self.inner.participant_rows(ids)
    }

    fn fetch_declaration(
        &self,
        id: &DeclarationId,
    ) -> Result<Option<Declaration>, RepositoryError> {
        self.inner.fetch_declaration(id)
    }

    fn declaration_by_code(&self, code: &str) -> Result<Option<Declaration>, RepositoryError> {
        self.inner.declaration_by_code(code)
    }

    fn participants_of(&self, id: &DeclarationId) -> Result<Vec<Participant>, RepositoryError> {
        if self.fail_member_reads.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        self.inner.participants_of(id)
    }

    fn participants_linked_to(&self, id: &PaymentId) -> Result<Vec<Participant>, RepositoryError> {
        self.inner.participants_linked_to(id)
    }

    fn create_declaration(
        &self,
        declaration: NewDeclaration,
    ) -> Result<Declaration, RepositoryError> {
        if self.fail_create_declaration.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        self.mutate();
        self.inner.create_declaration(declaration)
    }

    fn reassign_participant(
        &self,
        id: &ParticipantId,
        declaration_id: &DeclarationId,
    ) -> Result<(), RepositoryError> {
        if self
            .fail_reassign
            .lock()
            .expect("script mutex poisoned")
            .contains(id)
        {
            return Err(Self::offline());
        }
        self.mutate();
        self.inner.reassign_participant(id, declaration_id)
    }

    fn update_participant_status(
        &self,
        id: &ParticipantId,
        status: ParticipantStatus,
        actor: &UserId,
        note: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.mutate();
        self.inner.update_participant_status(id, status, actor, note)
    }

    fn update_participant_payment_link(
        &self,
        id: &ParticipantId,
        payment_id: &PaymentId,
        status: PaymentStatus,
        settled_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        if self
            .fail_links
            .lock()
            .expect("script mutex poisoned")
            .contains(id)
        {
            return Err(Self::offline());
        }
        self.mutate();
        self.inner
            .update_participant_payment_link(id, payment_id, status, settled_at)
    }

    fn update_declaration_status(
        &self,
        id: &DeclarationId,
        status: DeclarationStatus,
        actor: &UserId,
        note: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.mutate();
        self.inner.update_declaration_status(id, status, actor, note)
    }

    fn create_payment(&self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        if self.fail_create_payment.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        self.mutate();
        self.inner.create_payment(payment)
    }

    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        self.inner.fetch_payment(id)
    }

    fn payment_for_declaration(
        &self,
        id: &DeclarationId,
    ) -> Result<Option<Payment>, RepositoryError> {
        self.inner.payment_for_declaration(id)
    }

    fn payments_for_declaration(
        &self,
        id: &DeclarationId,
    ) -> Result<Vec<Payment>, RepositoryError> {
        self.inner.payments_for_declaration(id)
    }

    fn complete_payment(
        &self,
        id: &PaymentId,
        settled_at: DateTime<Utc>,
    ) -> Result<Payment, RepositoryError> {
        if self.fail_complete_payment.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        self.mutate();
        self.inner.complete_payment(id, settled_at)
    }

    fn update_payment_status_for_linked_participants(
        &self,
        id: &PaymentId,
        status: PaymentStatus,
    ) -> Result<usize, RepositoryError> {
        self.mutate();
        self.inner
            .update_payment_status_for_linked_participants(id, status)
    }
}

/// Store that is offline for every call.
pub(super) struct UnavailableStore;

impl DeclarationStore for UnavailableStore {
    fn list_unprocessed_participants(
        &self,
        _filter: &ParticipantFilter,
    ) -> Result<ParticipantPage, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn participant_rows(
        &self,
        _ids: &[ParticipantId],
    ) -> Result<Vec<ParticipantRow>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_declaration(
        &self,
        _id: &DeclarationId,
    ) -> Result<Option<Declaration>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn declaration_by_code(&self, _code: &str) -> Result<Option<Declaration>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn participants_of(&self, _id: &DeclarationId) -> Result<Vec<Participant>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn participants_linked_to(
        &self,
        _id: &PaymentId,
    ) -> Result<Vec<Participant>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn create_declaration(
        &self,
        _declaration: NewDeclaration,
    ) -> Result<Declaration, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn reassign_participant(
        &self,
        _id: &ParticipantId,
        _declaration_id: &DeclarationId,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update_participant_status(
        &self,
        _id: &ParticipantId,
        _status: ParticipantStatus,
        _actor: &UserId,
        _note: Option<&str>,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update_participant_payment_link(
        &self,
        _id: &ParticipantId,
        _payment_id: &PaymentId,
        _status: PaymentStatus,
        _settled_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update_declaration_status(
        &self,
        _id: &DeclarationId,
        _status: DeclarationStatus,
        _actor: &UserId,
        _note: Option<&str>,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn create_payment(&self, _payment: NewPayment) -> Result<Payment, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_payment(&self, _id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn payment_for_declaration(
        &self,
        _id: &DeclarationId,
    ) -> Result<Option<Payment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn payments_for_declaration(
        &self,
        _id: &DeclarationId,
    ) -> Result<Vec<Payment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn complete_payment(
        &self,
        _id: &PaymentId,
        _settled_at: DateTime<Utc>,
    ) -> Result<Payment, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update_payment_status_for_linked_participants(
        &self,
        _id: &PaymentId,
        _status: PaymentStatus,
    ) -> Result<usize, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
