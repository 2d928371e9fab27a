use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Event names exchanged with other views of the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PaymentCreated,
    PaymentConfirmed,
    DeclarationStatusChanged,
    RefreshUnprocessedView,
    PendingPaymentReminder,
}

impl EventKind {
    pub const fn label(self) -> &'static str {
        match self {
            EventKind::PaymentCreated => "payment_created",
            EventKind::PaymentConfirmed => "payment_confirmed",
            EventKind::DeclarationStatusChanged => "declaration_status_changed",
            EventKind::RefreshUnprocessedView => "refresh_unprocessed_view",
            EventKind::PendingPaymentReminder => "pending_payment_reminder",
        }
    }
}

/// Event payload; details are flat string pairs so any view can consume them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub details: BTreeMap<String, String>,
}

impl WorkflowEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            details: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

pub type EventHandler = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Publish/subscribe boundary used to refresh other screens after a state change.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: WorkflowEvent) -> Result<(), EventError>;
    fn subscribe(&self, kind: EventKind, handler: EventHandler)
        -> Result<SubscriptionId, EventError>;
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), EventError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),
}

/// Process-local bus delivering events synchronously to subscribers.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: Mutex<BTreeMap<EventKind, Vec<(SubscriptionId, EventHandler)>>>,
    history: Mutex<Vec<WorkflowEvent>>,
    sequence: AtomicU64,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far, oldest first.
    pub fn history(&self) -> Vec<WorkflowEvent> {
        self.history
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.history
            .lock()
            .map(|events| events.iter().filter(|event| event.kind == kind).count())
            .unwrap_or(0)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: WorkflowEvent) -> Result<(), EventError> {
        let handlers: Vec<EventHandler> = {
            let subscribers = self
                .subscribers
                .lock()
                .map_err(|_| EventError::Unavailable("subscriber lock poisoned".to_string()))?;
            subscribers
                .get(&event.kind)
                .map(|entries| entries.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default()
        };

        self.history
            .lock()
            .map_err(|_| EventError::Unavailable("history lock poisoned".to_string()))?
            .push(event.clone());

        for handler in handlers {
            handler(&event);
        }
        Ok(())
    }

    fn subscribe(
        &self,
        kind: EventKind,
        handler: EventHandler,
    ) -> Result<SubscriptionId, EventError> {
        let id = SubscriptionId(self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        self.subscribers
            .lock()
            .map_err(|_| EventError::Unavailable("subscriber lock poisoned".to_string()))?
            .entry(kind)
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), EventError> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| EventError::Unavailable("subscriber lock poisoned".to_string()))?;
        let mut removed = false;
        for entries in subscribers.values_mut() {
            let before = entries.len();
            entries.retain(|(existing, _)| *existing != id);
            removed |= entries.len() != before;
        }
        if removed {
            Ok(())
        } else {
            Err(EventError::UnknownSubscription(id.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribers_receive_only_their_kind() {
        let bus = InMemoryEventBus::new();
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = refreshes.clone();
        bus.subscribe(
            EventKind::RefreshUnprocessedView,
            Arc::new(move |_event: &WorkflowEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("subscribe");

        bus.publish(WorkflowEvent::new(EventKind::RefreshUnprocessedView))
            .expect("publish refresh");
        bus.publish(WorkflowEvent::new(EventKind::PaymentConfirmed).with("payment_id", "pay-1"))
            .expect("publish confirmation");

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(bus.history().len(), 2);
        assert_eq!(
            bus.history()[1].detail("payment_id"),
            Some("pay-1"),
            "details survive publication"
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = InMemoryEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = bus
            .subscribe(
                EventKind::PaymentConfirmed,
                Arc::new(move |_event: &WorkflowEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("subscribe");

        bus.unsubscribe(id).expect("unsubscribe");
        bus.publish(WorkflowEvent::new(EventKind::PaymentConfirmed))
            .expect("publish");

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(matches!(
            bus.unsubscribe(id),
            Err(EventError::UnknownSubscription(_))
        ));
    }
}
