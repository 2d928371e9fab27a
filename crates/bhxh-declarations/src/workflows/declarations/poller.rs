use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::domain::{DeclarationStatus, UserId};
use super::events::{EventBus, EventKind, WorkflowEvent};
use super::repository::{DeclarationStore, ParticipantFilter};

/// Handle for the fixed-interval pending-payment re-check. Dropping it cancels the task.
#[derive(Debug)]
pub struct PendingPaymentPoller {
    task: JoinHandle<()>,
}

impl PendingPaymentPoller {
    /// Start polling on the current tokio runtime. The first check runs immediately.
    pub fn spawn<S, E>(
        store: Arc<S>,
        events: Arc<E>,
        owner_id: Option<UserId>,
        every: Duration,
    ) -> Self
    where
        S: DeclarationStore + 'static,
        E: EventBus + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                check_pending(store.as_ref(), events.as_ref(), owner_id.as_ref());
            }
        });
        Self { task }
    }

    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PendingPaymentPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One re-check: publish a reminder when declarations are still awaiting payment.
pub fn check_pending<S, E>(store: &S, events: &E, owner_id: Option<&UserId>) -> usize
where
    S: DeclarationStore + ?Sized,
    E: EventBus + ?Sized,
{
    let filter = ParticipantFilter {
        owner_id: owner_id.cloned(),
        declaration_status: Some(DeclarationStatus::PendingPayment),
        ..ParticipantFilter::default()
    };

    let page = match store.list_unprocessed_participants(&filter) {
        Ok(page) => page,
        Err(err) => {
            warn!(error = %err, "pending payment check failed");
            return 0;
        }
    };

    let codes: BTreeSet<&str> = page
        .items
        .iter()
        .map(|row| row.declaration.code.as_str())
        .collect();
    if codes.is_empty() {
        debug!("no declarations awaiting payment");
        return 0;
    }

    let mut event = WorkflowEvent::new(EventKind::PendingPaymentReminder)
        .with("count", codes.len())
        .with("declarations", codes.iter().copied().collect::<Vec<_>>().join(","));
    if let Some(owner) = owner_id {
        event = event.with("owner_id", owner);
    }
    if let Err(err) = events.publish(event) {
        warn!(error = %err, "failed to publish pending payment reminder");
    }
    codes.len()
}
