//! Event bus for repair-session observers
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never blocks the
//! controller; slow subscribers lag and lose events rather than stall it.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::RepairEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("No subscribers for {event_type} event")]
    NoSubscribers { event_type: &'static str },
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<RepairEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Create an event bus with a custom buffer size
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers, returning how many received it.
    ///
    /// Fails only when nobody is subscribed; the event is dropped.
    pub fn publish(&self, event: RepairEvent) -> EventBusResult<usize> {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                Ok(count)
            }
            Err(_) => {
                debug!(event_type, "Event dropped (no receivers)");
                Err(EventBusError::NoSubscribers { event_type })
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<RepairEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by session ID
    pub session_id: Option<String>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by session ID
    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &RepairEvent) -> bool {
        if let Some(ref sid) = self.session_id {
            if event.session_id() != sid {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<RepairEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<RepairEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<RepairEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}
