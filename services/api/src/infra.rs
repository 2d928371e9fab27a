use bhxh_declarations::workflows::declarations::{
    Declaration, DeclarationId, DeclarationStatus, InMemoryDeclarationStore, Participant,
    ParticipantId, ParticipantStatus, RepositoryError, UserId,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn sample_owner() -> UserId {
    UserId("agent-01".to_string())
}

/// One sample declaration and its participants as `(id, primary contribution, status)`.
struct SampleDeclaration {
    id: &'static str,
    code: &'static str,
    status: DeclarationStatus,
    participants: &'static [(&'static str, Option<i64>, ParticipantStatus)],
}

const SAMPLES: &[SampleDeclaration] = &[
    SampleDeclaration {
        id: "d-kk001",
        code: "KK001",
        status: DeclarationStatus::Draft,
        participants: &[
            ("p-kk001-1", Some(100), ParticipantStatus::Draft),
            ("p-kk001-2", Some(200), ParticipantStatus::Draft),
            ("p-kk001-3", Some(300), ParticipantStatus::Draft),
        ],
    },
    SampleDeclaration {
        id: "d-kk002",
        code: "KK002",
        status: DeclarationStatus::Submitted,
        participants: &[("p-kk002-1", Some(400), ParticipantStatus::Submitted)],
    },
    SampleDeclaration {
        id: "d-kk005",
        code: "KK005",
        status: DeclarationStatus::Draft,
        participants: &[
            ("p-kk005-1", None, ParticipantStatus::Draft),
            ("p-kk005-2", Some(0), ParticipantStatus::Draft),
        ],
    },
];

/// Load the sample declarations, newest first by one day per declaration from `anchor`.
pub(crate) fn seed_samples(
    store: &InMemoryDeclarationStore,
    owner: &UserId,
    anchor: DateTime<Utc>,
) -> Result<usize, RepositoryError> {
    let mut participants = 0;
    for (offset, sample) in SAMPLES.iter().enumerate() {
        let declaration_id = DeclarationId(sample.id.to_string());
        store.seed_declaration(Declaration {
            id: declaration_id.clone(),
            code: sample.code.to_string(),
            name: format!("Danh sach {}", sample.code),
            kind: "tang_moi".to_string(),
            status: sample.status,
            created_at: anchor - Duration::days(offset as i64),
            approved_at: None,
            owner_id: owner.clone(),
            unit_code: Some("DV-HN-01".to_string()),
            agency_code: Some("BHXH-HN".to_string()),
            parent_id: None,
            note: None,
        })?;

        for (id, contribution, status) in sample.participants {
            store.seed_participant(Participant {
                id: ParticipantId((*id).to_string()),
                declaration_id: declaration_id.clone(),
                full_name: format!("Nguoi tham gia {id}"),
                national_id: None,
                insurance_id: None,
                contribution: *contribution,
                secondary_contribution: None,
                status: *status,
                payment_status: None,
                payment_id: None,
                submitted_at: None,
                settled_at: None,
            })?;
            participants += 1;
        }
    }
    Ok(participants)
}
