use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Declaration, DeclarationId, DeclarationStatus, NewDeclaration, NewPayment, Participant,
    ParticipantId, ParticipantRow, ParticipantStatus, Payment, PaymentId, PaymentStatus, UserId,
};

/// Facets for the unprocessed listing. Interpreted by the store only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantFilter {
    pub owner_id: Option<UserId>,
    pub search: Option<String>,
    pub participant_status: Option<ParticipantStatus>,
    pub declaration_status: Option<DeclarationStatus>,
    pub declaration_code: Option<String>,
    pub unit_code: Option<String>,
    pub agency_code: Option<String>,
    pub created_from: Option<NaiveDate>,
    pub created_to: Option<NaiveDate>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// One page of the unprocessed listing plus the unpaged total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParticipantPage {
    pub items: Vec<ParticipantRow>,
    pub total: usize,
}

/// Data-access boundary for declarations, participants, and payments.
///
/// Every mutation is a single-row, auto-committing operation; callers compose
/// multi-row steps themselves and handle partial failure.
pub trait DeclarationStore: Send + Sync {
    fn list_unprocessed_participants(
        &self,
        filter: &ParticipantFilter,
    ) -> Result<ParticipantPage, RepositoryError>;

    /// Rows for the given ids, each carrying its current declaration. Unknown ids are skipped.
    fn participant_rows(&self, ids: &[ParticipantId])
        -> Result<Vec<ParticipantRow>, RepositoryError>;

    fn fetch_declaration(&self, id: &DeclarationId)
        -> Result<Option<Declaration>, RepositoryError>;

    fn declaration_by_code(&self, code: &str) -> Result<Option<Declaration>, RepositoryError>;

    /// Every participant currently attached to the declaration, ordered by id.
    fn participants_of(&self, id: &DeclarationId) -> Result<Vec<Participant>, RepositoryError>;

    fn participants_linked_to(&self, id: &PaymentId) -> Result<Vec<Participant>, RepositoryError>;

    fn create_declaration(&self, declaration: NewDeclaration)
        -> Result<Declaration, RepositoryError>;

    /// Re-point one participant to another declaration.
    fn reassign_participant(
        &self,
        id: &ParticipantId,
        declaration_id: &DeclarationId,
    ) -> Result<(), RepositoryError>;

    fn update_participant_status(
        &self,
        id: &ParticipantId,
        status: ParticipantStatus,
        actor: &UserId,
        note: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// Link a participant to a payment. An existing `settled_at` is never overwritten.
    fn update_participant_payment_link(
        &self,
        id: &ParticipantId,
        payment_id: &PaymentId,
        status: PaymentStatus,
        settled_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;

    fn update_declaration_status(
        &self,
        id: &DeclarationId,
        status: DeclarationStatus,
        actor: &UserId,
        note: Option<&str>,
    ) -> Result<(), RepositoryError>;

    fn create_payment(&self, payment: NewPayment) -> Result<Payment, RepositoryError>;

    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError>;

    /// Most recent payment created for the declaration.
    fn payment_for_declaration(&self, id: &DeclarationId)
        -> Result<Option<Payment>, RepositoryError>;

    fn payments_for_declaration(&self, id: &DeclarationId) -> Result<Vec<Payment>, RepositoryError>;

    /// Mark a payment settled. Keyed by id; a payment that is already completed keeps its
    /// original settlement timestamp.
    fn complete_payment(
        &self,
        id: &PaymentId,
        settled_at: DateTime<Utc>,
    ) -> Result<Payment, RepositoryError>;

    /// Bulk sync of the payment status onto every linked participant; returns the rows changed.
    fn update_payment_status_for_linked_participants(
        &self,
        id: &PaymentId,
        status: PaymentStatus,
    ) -> Result<usize, RepositoryError>;
}

/// Error enumeration for data-access failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
