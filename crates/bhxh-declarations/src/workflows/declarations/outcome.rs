use serde::Serialize;

use super::domain::ParticipantId;

/// Result of a best-effort loop of independent single-row commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<ParticipantId>,
    pub failed: Vec<RowFailure>,
}

/// One row that could not be updated, with the error rendered for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub id: ParticipantId,
    pub error: String,
}

impl BatchOutcome {
    pub fn record_success(&mut self, id: ParticipantId) {
        self.succeeded.push(id);
    }

    pub fn record_failure(&mut self, id: ParticipantId, error: impl ToString) {
        self.failed.push(RowFailure {
            id,
            error: error.to_string(),
        });
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Operator-facing warning, `None` when every row succeeded.
    pub fn warning(&self, step: &str) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let ids: Vec<&str> = self.failed.iter().map(|row| row.id.0.as_str()).collect();
        Some(format!(
            "{step}: {} of {} rows failed ({})",
            self.failed.len(),
            self.attempted(),
            ids.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_lists_failed_rows() {
        let mut outcome = BatchOutcome::default();
        outcome.record_success(ParticipantId("p-1".to_string()));
        outcome.record_failure(ParticipantId("p-2".to_string()), "timeout");
        outcome.record_failure(ParticipantId("p-3".to_string()), "timeout");

        assert!(!outcome.is_complete());
        assert_eq!(
            outcome.warning("payment link").as_deref(),
            Some("payment link: 2 of 3 rows failed (p-2, p-3)")
        );
    }

    #[test]
    fn complete_batches_have_no_warning() {
        let mut outcome = BatchOutcome::default();
        outcome.record_success(ParticipantId("p-1".to_string()));
        assert!(outcome.is_complete());
        assert_eq!(outcome.warning("reassign"), None);
    }
}
