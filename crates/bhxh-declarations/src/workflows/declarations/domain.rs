use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for declarations (batch submission units).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeclarationId(pub String);

/// Identifier wrapper for participant enrollment records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

/// Identifier wrapper for payment records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub String);

/// Staff member acting on the workflow or owning a declaration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

macro_rules! display_id {
    ($($ty:ty),+) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

display_id!(DeclarationId, ParticipantId, PaymentId, UserId);

/// Personal status of a participant, tracked independently of its declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Draft,
    Submitted,
    Processing,
    Approved,
    Rejected,
}

impl ParticipantStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ParticipantStatus::Draft => "draft",
            ParticipantStatus::Submitted => "submitted",
            ParticipantStatus::Processing => "processing",
            ParticipantStatus::Approved => "approved",
            ParticipantStatus::Rejected => "rejected",
        }
    }
}

/// Batch-level status of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationStatus {
    Draft,
    Submitted,
    PendingPayment,
    Processing,
}

impl DeclarationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DeclarationStatus::Draft => "draft",
            DeclarationStatus::Submitted => "submitted",
            DeclarationStatus::PendingPayment => "pending_payment",
            DeclarationStatus::Processing => "processing",
        }
    }
}

/// Settlement state shared by payments and the participants linked to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }
}

/// A batch of participants submitted together to the insurance authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub id: DeclarationId,
    pub code: String,
    pub name: String,
    pub kind: String,
    pub status: DeclarationStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub owner_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency_code: Option<String>,
    /// Set when the declaration was forked off another one by a split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<DeclarationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Declaration {
    pub fn summary(&self) -> DeclarationSummary {
        DeclarationSummary {
            id: self.id.clone(),
            code: self.code.clone(),
            name: self.name.clone(),
            status: self.status,
        }
    }
}

/// One insured individual's enrollment record inside a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub declaration_id: DeclarationId,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurance_id: Option<String>,
    /// Computed contribution amount in VND.
    #[serde(default)]
    pub contribution: Option<i64>,
    /// Alternate amount field filled by some upstream entry forms.
    #[serde(default)]
    pub secondary_contribution: Option<i64>,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub payment_id: Option<PaymentId>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
}

/// A single amount-bearing settlement request for one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub declaration_id: DeclarationId,
    pub amount: i64,
    pub method: String,
    pub description: String,
    pub creator_id: UserId,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Denormalized slice of the parent declaration carried with every loaded participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationSummary {
    pub id: DeclarationId,
    pub code: String,
    pub name: String,
    pub status: DeclarationStatus,
}

/// Participant row as returned by the unprocessed listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub participant: Participant,
    pub declaration: DeclarationSummary,
}

/// Insert payload for a declaration row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeclaration {
    pub source_id: Option<DeclarationId>,
    pub code: String,
    pub name: String,
    pub kind: String,
    pub status: DeclarationStatus,
    pub owner_id: UserId,
    pub unit_code: Option<String>,
    pub agency_code: Option<String>,
    pub note: Option<String>,
}

/// Insert payload for a payment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub declaration_id: DeclarationId,
    pub amount: i64,
    pub method: String,
    pub description: String,
    pub creator_id: UserId,
}
