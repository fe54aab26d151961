//! Change notification fan-out.
//!
//! Subscribers register a path prefix; every successful mutation publishes
//! an event, and every subscriber whose prefix covers the mutated path
//! receives a copy. Publishing never blocks the mutator: a subscriber whose
//! channel has gone away is dropped on the spot.

use crate::tree::now_millis;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Kind of change that occurred at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A create, overwrite, or patch.
    Update,
    /// A deletion.
    Delete,
}

impl EventKind {
    /// The event name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

/// A single change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: EventKind,
    /// Canonical URI of the mutated entity.
    pub path: String,
    /// When the mutation was published, Unix milliseconds.
    pub at_millis: u64,
}

struct Subscriber {
    prefix: Vec<String>,
    tx: Sender<ChangeEvent>,
}

/// Distributes change events to path-prefix subscribers.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to every change at or under the given path segments.
    ///
    /// The returned receiver gets all future matching events. Dropping it
    /// unsubscribes on the next publish.
    pub fn subscribe(&self, prefix: Vec<String>) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(Subscriber { prefix, tx });
        rx
    }

    /// Publishes a change at the given resolved path.
    ///
    /// Delivery is a non-blocking channel send per matching subscriber;
    /// subscribers with a closed channel are removed.
    pub fn publish(&self, kind: EventKind, segments: &[String], path: &str) {
        let event = ChangeEvent {
            kind,
            path: path.to_string(),
            at_millis: now_millis(),
        };
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|subscriber| {
            if !is_prefix(&subscriber.prefix, segments) {
                return true;
            }
            subscriber.tx.send(event.clone()).is_ok()
        });
    }

    /// Number of registered subscribers (including ones whose receivers
    /// have gone away but have not yet been pruned).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    path.len() >= prefix.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_path_receives_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe(segments(&["db1", "doc1"]));

        bus.publish(EventKind::Update, &segments(&["db1", "doc1"]), "/v1/db1/doc1");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.path, "/v1/db1/doc1");
    }

    #[test]
    fn prefix_receives_nested_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe(segments(&["db1"]));

        bus.publish(
            EventKind::Delete,
            &segments(&["db1", "doc1", "subc"]),
            "/v1/db1/doc1/subc",
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Delete);
    }

    #[test]
    fn sibling_paths_are_not_notified() {
        let bus = EventBus::new();
        let rx = bus.subscribe(segments(&["db1", "doc1"]));

        bus.publish(EventKind::Update, &segments(&["db1", "doc2"]), "/v1/db1/doc2");
        bus.publish(EventKind::Update, &segments(&["db2"]), "/v1/db2");

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn parent_writes_do_not_reach_deeper_subscribers() {
        let bus = EventBus::new();
        let rx = bus.subscribe(segments(&["db1", "doc1"]));

        bus.publish(EventKind::Delete, &segments(&["db1"]), "/v1/db1");

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let bus = EventBus::new();
        let rx = bus.subscribe(segments(&["db1"]));
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish(EventKind::Update, &segments(&["db1"]), "/v1/db1");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe(segments(&["db1"]));
        let rx2 = bus.subscribe(segments(&["db1"]));

        bus.publish(EventKind::Update, &segments(&["db1", "doc1"]), "/v1/db1/doc1");

        assert_eq!(rx1.try_recv().unwrap().path, "/v1/db1/doc1");
        assert_eq!(rx2.try_recv().unwrap().path, "/v1/db1/doc1");
    }
}
