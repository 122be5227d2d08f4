//! Event bus for FleetLink.
//!
//! Every extension, fleet manager and discovery browser publishes onto an
//! event bus. Publishing never blocks and never runs subscriber code: events
//! are queued on a broadcast channel and each subscriber drains its own
//! receiver on its own task. This makes it safe to publish while holding a
//! state lock, which is how status changes stay totally ordered.

use crate::event::{EventMetadata, ExtensionEvent, ExtensionId};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Event bus for FleetLink.
///
/// The event bus uses a broadcast channel to distribute events to all
/// subscribers. It supports:
/// - Publishing events with automatic metadata generation
/// - Subscribing to all events
/// - Filtered subscriptions for specific event types
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast channel sender
    tx: broadcast::Sender<(ExtensionEvent, EventMetadata)>,
    /// Event bus name for identification
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            tx: broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0,
            name: name.into(),
        }
    }

    /// Get the name of this event bus.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with default metadata.
    ///
    /// Returns `true` if there was at least one subscriber. Events published
    /// without subscribers are discarded.
    pub fn publish(&self, event: ExtensionEvent) -> bool {
        self.publish_with_source(event, self.name.clone())
    }

    /// Publish an event with a custom source.
    pub fn publish_with_source(&self, event: ExtensionEvent, source: impl Into<String>) -> bool {
        self.publish_with_metadata(event, EventMetadata::new(source))
    }

    /// Publish an event with custom metadata.
    pub fn publish_with_metadata(&self, event: ExtensionEvent, metadata: EventMetadata) -> bool {
        self.tx.send((event, metadata)).is_ok()
    }

    /// Subscribe to all events.
    ///
    /// If the subscriber falls behind, older events may be dropped.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&ExtensionEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }

    /// Create a filtered subscription helper for common patterns.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(ExtensionEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<(ExtensionEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event bus receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(ExtensionEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&ExtensionEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(ExtensionEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&ExtensionEvent) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<(ExtensionEvent, EventMetadata)>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next event matching the filter.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<(ExtensionEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Filtered event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(ExtensionEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}

/// Builder for creating filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<(ExtensionEvent, EventMetadata)>,
}

impl FilterBuilder {
    /// Subscribe to single-extension events only.
    pub fn extension_events(&self) -> FilteredReceiver<fn(&ExtensionEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), ExtensionEvent::is_extension_event)
    }

    /// Subscribe to fleet events only.
    pub fn fleet_events(&self) -> FilteredReceiver<fn(&ExtensionEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), ExtensionEvent::is_fleet_event)
    }

    /// Subscribe to discovery events only.
    pub fn discovery_events(&self) -> FilteredReceiver<fn(&ExtensionEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), ExtensionEvent::is_discovery_event)
    }

    /// Subscribe to scanned barcodes, per extension and fleet-wide.
    pub fn scan_events(&self) -> FilteredReceiver<fn(&ExtensionEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), ExtensionEvent::is_scan_event)
    }

    /// Subscribe to single-extension events of one extension.
    pub fn extension_by_id(
        &self,
        id: ExtensionId,
    ) -> FilteredReceiver<impl Fn(&ExtensionEvent) -> bool + Send + 'static> {
        FilteredReceiver::new(self.tx.subscribe(), move |event| {
            event.is_extension_event() && event.extension() == Some(&id)
        })
    }

    /// Subscribe with a custom filter function.
    pub fn custom<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&ExtensionEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;
