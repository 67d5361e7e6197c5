//! Event Bus Module
//!
//! Delivers invalidation and resolution notifications to subscribers.
//!
//! The bus is an explicit subscriber list owned by the cache controller,
//! not an inheritance hook: subscribing hands back a [`Subscription`] whose
//! channel receives every event matching the subscription's filter. Closed
//! subscriptions are pruned on the next publish.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;

// == Event Kind ==
/// What a cache event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An entry was marked no-longer-authoritative
    Invalidate,
    /// A refresh resolved a previously invalidated entry
    Resolve,
}

// == Invalidation Event ==
/// A single cache notification.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationEvent {
    /// Key the event concerns
    pub key: String,
    /// Kind of event
    pub kind: EventKind,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

impl InvalidationEvent {
    /// Creates an event stamped with the current time.
    pub fn new(key: impl Into<String>, kind: EventKind) -> Self {
        Self {
            key: key.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

// == Event Filter ==
/// Restricts which events a subscription receives.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only deliver events for this exact key; `None` delivers everything
    pub key: Option<String>,
}

impl EventFilter {
    /// Matches all events.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches events for a single key.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }

    fn matches(&self, event: &InvalidationEvent) -> bool {
        match &self.key {
            Some(key) => key == &event.key,
            None => true,
        }
    }
}

// == Subscription ==
/// A live event stream handed out by [`EventBus::subscribe`].
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<InvalidationEvent>,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<InvalidationEvent> {
        self.rx.recv().await
    }

    /// Drains every event delivered so far without waiting.
    pub fn drain(&mut self) -> Vec<InvalidationEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

// == Event Bus ==
/// Explicit observer list for cache notifications.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<SubscriberEntry>>,
}

struct SubscriberEntry {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<InvalidationEvent>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its event stream.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .push(SubscriberEntry { filter, tx });
        Subscription { rx }
    }

    /// Delivers an event to every matching live subscriber.
    pub fn publish(&self, event: InvalidationEvent) {
        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.retain(|entry| {
            if !entry.filter.matches(&event) {
                return !entry.tx.is_closed();
            }
            entry.tx.send(event.clone()).is_ok()
        });
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_published_event() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(InvalidationEvent::new("k1", EventKind::Invalidate));

        let event = sub.next().await.unwrap();
        assert_eq!(event.key, "k1");
        assert_eq!(event.kind, EventKind::Invalidate);
    }

    #[tokio::test]
    async fn test_key_filter_excludes_other_keys() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::key("wanted"));

        bus.publish(InvalidationEvent::new("other", EventKind::Invalidate));
        bus.publish(InvalidationEvent::new("wanted", EventKind::Resolve));

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "wanted");
        assert_eq!(events[0].kind, EventKind::Resolve);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::all());
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        bus.publish(InvalidationEvent::new("k", EventKind::Invalidate));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_all_receive() {
        let bus = EventBus::new();
        let mut first = bus.subscribe(EventFilter::all());
        let mut second = bus.subscribe(EventFilter::all());

        bus.publish(InvalidationEvent::new("k", EventKind::Invalidate));

        assert_eq!(first.drain().len(), 1);
        assert_eq!(second.drain().len(), 1);
    }

    #[test]
    fn test_event_serializes_kind_lowercase() {
        let event = InvalidationEvent::new("k", EventKind::Invalidate);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"invalidate\""));
        assert!(json.contains("\"k\""));
    }
}
