use serde::{Deserialize, Serialize};

use super::domain::Participant;

/// Rule deciding which of a participant's two amount fields is billed.
///
/// Declarations carry either the primary or the secondary field depending on
/// the entry form that produced them, so the choice is explicit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionPolicy {
    /// Primary when set and positive, else secondary when set and positive, else zero.
    #[default]
    PrimaryThenSecondary,
    PrimaryOnly,
    SecondaryOnly,
}

impl ContributionPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "primary_then_secondary" | "fallback" => Some(Self::PrimaryThenSecondary),
            "primary_only" | "primary" => Some(Self::PrimaryOnly),
            "secondary_only" | "secondary" => Some(Self::SecondaryOnly),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ContributionPolicy::PrimaryThenSecondary => "primary_then_secondary",
            ContributionPolicy::PrimaryOnly => "primary_only",
            ContributionPolicy::SecondaryOnly => "secondary_only",
        }
    }

    /// Billable amount for a single participant; unset or non-positive fields count as zero.
    pub fn amount_for(self, participant: &Participant) -> i64 {
        let positive = |value: Option<i64>| value.filter(|amount| *amount > 0);
        let primary = positive(participant.contribution);
        let secondary = positive(participant.secondary_contribution);

        match self {
            ContributionPolicy::PrimaryThenSecondary => primary.or(secondary).unwrap_or(0),
            ContributionPolicy::PrimaryOnly => primary.unwrap_or(0),
            ContributionPolicy::SecondaryOnly => secondary.unwrap_or(0),
        }
    }

    pub fn total<'a, I>(self, participants: I) -> i64
    where
        I: IntoIterator<Item = &'a Participant>,
    {
        participants
            .into_iter()
            .fold(0i64, |sum, participant| {
                sum.saturating_add(self.amount_for(participant))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::declarations::domain::{DeclarationId, ParticipantId, ParticipantStatus};

    fn participant(primary: Option<i64>, secondary: Option<i64>) -> Participant {
        Participant {
            id: ParticipantId("p-1".to_string()),
            declaration_id: DeclarationId("d-1".to_string()),
            full_name: "Nguyen Van A".to_string(),
            national_id: None,
            insurance_id: None,
            contribution: primary,
            secondary_contribution: secondary,
            status: ParticipantStatus::Draft,
            payment_status: None,
            payment_id: None,
            submitted_at: None,
            settled_at: None,
        }
    }

    #[test]
    fn fallback_prefers_primary_when_positive() {
        let policy = ContributionPolicy::PrimaryThenSecondary;
        assert_eq!(policy.amount_for(&participant(Some(150), Some(90))), 150);
    }

    #[test]
    fn fallback_uses_secondary_when_primary_unset_or_zero() {
        let policy = ContributionPolicy::PrimaryThenSecondary;
        assert_eq!(policy.amount_for(&participant(None, Some(90))), 90);
        assert_eq!(policy.amount_for(&participant(Some(0), Some(90))), 90);
        assert_eq!(policy.amount_for(&participant(Some(-5), Some(90))), 90);
        assert_eq!(policy.amount_for(&participant(None, None)), 0);
    }

    #[test]
    fn strict_policies_ignore_the_other_field() {
        let both = participant(Some(150), Some(90));
        let only_secondary = participant(None, Some(90));
        assert_eq!(ContributionPolicy::PrimaryOnly.amount_for(&both), 150);
        assert_eq!(ContributionPolicy::PrimaryOnly.amount_for(&only_secondary), 0);
        assert_eq!(ContributionPolicy::SecondaryOnly.amount_for(&both), 90);
    }

    #[test]
    fn total_sums_resolved_amounts() {
        let participants = vec![
            participant(Some(100), None),
            participant(None, Some(200)),
            participant(None, None),
        ];
        assert_eq!(
            ContributionPolicy::PrimaryThenSecondary.total(&participants),
            300
        );
    }

    #[test]
    fn parse_accepts_labels_and_aliases() {
        assert_eq!(
            ContributionPolicy::parse("PRIMARY_ONLY"),
            Some(ContributionPolicy::PrimaryOnly)
        );
        assert_eq!(
            ContributionPolicy::parse("fallback"),
            Some(ContributionPolicy::PrimaryThenSecondary)
        );
        assert_eq!(ContributionPolicy::parse("median"), None);
    }
}
