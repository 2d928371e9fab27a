//! Declaration-participant submission and payment reconciliation workflow.
//!
//! Participants move through personal statuses independently of the declaration that owns
//! them. A payment always covers every participant currently attached to its declaration, so
//! billing a strict subset forks those participants into a new declaration first.

pub mod contribution;
pub mod domain;
pub mod events;
pub mod memory;
pub mod outcome;
pub mod payment;
pub mod planner;
pub mod poller;
pub mod repository;
pub mod router;
pub mod selection;
pub mod service;
pub mod status;

#[cfg(test)]
mod tests;

pub use contribution::ContributionPolicy;
pub use domain::{
    Declaration, DeclarationId, DeclarationStatus, DeclarationSummary, NewDeclaration, NewPayment,
    Participant, ParticipantId, ParticipantRow, ParticipantStatus, Payment, PaymentId,
    PaymentStatus, UserId,
};
pub use events::{
    EventBus, EventError, EventHandler, EventKind, InMemoryEventBus, SubscriptionId, WorkflowEvent,
};
pub use memory::InMemoryDeclarationStore;
pub use outcome::{BatchOutcome, RowFailure};
pub use payment::{PaymentOrchestrator, PaymentReceipt, ReconciliationReport};
pub use planner::{
    classify_selection, BillingGroup, GroupOrigin, GroupPlan, SplitError, SplitOutcome,
    SubmissionPath, SubmissionPlanner, ValidationError,
};
pub use poller::PendingPaymentPoller;
pub use repository::{DeclarationStore, ParticipantFilter, ParticipantPage, RepositoryError};
pub use router::declaration_router;
pub use selection::{classify, Bucket, BucketIndex, BucketSummary, SelectionEngine};
pub use service::{
    DeclarationWorkflowError, GroupOutcome, GroupReport, SubmissionReport, UnprocessedPage,
    UnprocessedRecordsService,
};
pub use status::{reconcile_statuses, StatusInconsistency};
