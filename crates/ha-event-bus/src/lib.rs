//! Event bus
//!
//! Components publish notifications such as `shopping_list_updated` here and
//! the WebSocket API forwards them to subscribed clients. Each event type has
//! its own broadcast channel; a separate channel carries every event for
//! wildcard subscribers.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type JsonEvent = Event<serde_json::Value>;

pub struct EventBus {
    channels: DashMap<EventType, broadcast::Sender<JsonEvent>>,
    match_all: broadcast::Sender<JsonEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all, _) = broadcast::channel(capacity);
        Self {
            channels: DashMap::new(),
            match_all,
            capacity,
        }
    }

    /// Subscribe to one event type, or to everything with `"*"`
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<JsonEvent> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing");

        if event_type.is_match_all() {
            return self.match_all.subscribe();
        }

        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to every event
    pub fn subscribe_all(&self) -> broadcast::Receiver<JsonEvent> {
        self.match_all.subscribe()
    }

    /// Subscribe to an event type with deserialized payloads
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Deliver an event to its type's subscribers and to wildcard subscribers
    pub fn fire(&self, event: JsonEvent) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.channels.get(&event.event_type) {
            // A send error only means nobody is listening
            let _ = sender.send(event.clone());
        }
        let _ = self.match_all.send(event);
    }

    /// Serialize typed data and fire it under its own event type
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context);
        match serde_json::to_value(&event.data) {
            Ok(value) => self.fire(event.map_data(|_| value)),
            Err(err) => warn!(event_type = T::event_type(), error = %err, "Dropping unserializable event"),
        }
    }

    /// Number of event types that have had at least one subscriber
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver yielding events whose payload parses as `T`
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<JsonEvent>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    /// Next event with a parseable payload; malformed payloads are skipped
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map_data(|_| data));
            }
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ListChanged {
        action: String,
    }

    impl EventData for ListChanged {
        fn event_type() -> &'static str {
            "list_changed"
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("shopping_list_updated");

        bus.fire(Event::new(
            "shopping_list_updated",
            json!({"action": "add"}),
            Context::new(),
        ));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type.as_str(), "shopping_list_updated");
        assert_eq!(received.data["action"], "add");
    }

    #[tokio::test]
    async fn test_wildcard_receives_everything() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("*");

        bus.fire(Event::new("event_a", json!({}), Context::new()));
        bus.fire(Event::new("event_b", json!({}), Context::new()));

        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "event_a");
        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "event_b");
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<ListChanged>();

        bus.fire(Event::new("list_changed", json!({"unexpected": 1}), Context::new()));
        bus.fire_typed(
            ListChanged {
                action: "clear".into(),
            },
            Context::new(),
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data.action, "clear");
    }

    #[tokio::test]
    async fn test_other_types_not_delivered() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("event_a");
        let mut rx_b = bus.subscribe("event_b");

        bus.fire(Event::new("event_a", json!({"n": 1}), Context::new()));

        assert_eq!(rx_a.recv().await.unwrap().data["n"], 1);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(bus.channel_count(), 2);
    }

    #[test]
    fn test_fire_without_subscribers() {
        let bus = EventBus::new();
        bus.fire(Event::new("nobody_listens", json!({}), Context::new()));
        assert_eq!(bus.channel_count(), 0);
    }
}
