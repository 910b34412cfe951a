//! Event Bus implementation.
//!
//! An owned pub/sub hub: the orchestrator constructs one and hands clones
//! of its handle to the components that publish. There is no process-wide
//! instance.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{EventCategory, EventEnvelope, ScannerEvent};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific event categories
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &ScannerEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type EventHandler = Box<dyn Fn(EventEnvelope) + Send + Sync>;

/// Typed pub/sub hub for scanner observability
///
/// Synchronous handlers run on the publishing thread and must return
/// quickly; handlers that might block are responsible for dispatching to
/// their own task. Delivery is in publication order per publishing thread.
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    handlers: Arc<RwLock<HashMap<SubscriptionId, (EventFilter, EventHandler)>>>,
}

impl EventBus {
    /// Create a new event bus with the default channel capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with a custom broadcast capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish an event from the named source
    ///
    /// Calls every matching synchronous handler, then fans out to async
    /// receivers. A bus with no observers at all is not an error.
    pub fn publish(&self, source: &str, event: ScannerEvent) {
        let envelope = EventEnvelope::new(source, event);

        tracing::debug!(
            source = %envelope.source,
            kind = envelope.event.kind(),
            "event published"
        );

        let handlers = self.handlers.read();
        for (filter, handler) in handlers.values() {
            if filter.matches(&envelope.event) {
                handler(envelope.clone());
            }
        }

        // Fan out to async receivers; SendError just means none are attached.
        let _ = self.sender.send(envelope);
    }

    /// Subscribe with a synchronous handler
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(EventEnvelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.handlers.write().insert(id, (filter, Box::new(handler)));
        tracing::debug!("subscription {} added", id);
        id
    }

    /// Get a receiver for consuming events in an async task
    pub fn receiver(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Remove a subscription; returns true if it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("subscription {} removed", id);
        }
        removed
    }

    /// Number of registered synchronous handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
