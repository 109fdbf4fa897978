//! In-memory message bus with fault injection.

use dfield_env::{BusController, BusMessage, EnvError, MessageBus, Subscription};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
struct TopicState {
    /// Set once the owner created the topic
    created: bool,

    expected_publishers: usize,

    /// (subscription id, sending half)
    subscribers: Vec<(u64, mpsc::UnboundedSender<BusMessage>)>,
}

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, TopicState>,
    blocked: HashSet<String>,
    closed: bool,
}

/// Topic bus shared by every peer of one simulation.
///
/// Subscribing before the owner created a topic is allowed; publishing to a
/// topic that was never created fails.
#[derive(Debug, Default)]
pub struct SimBus {
    state: Mutex<BusState>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl SimBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages delivered to at least the topic (not necessarily read).
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Publishes rejected by a blocked topic.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Names of every topic created by an owner, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state()
            .topics
            .iter()
            .filter(|(_, t)| t.created)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state().topics.get(topic).map_or(0, |t| t.subscribers.len())
    }

    pub fn expected_publishers(&self, topic: &str) -> Option<usize> {
        self.state()
            .topics
            .get(topic)
            .filter(|t| t.created)
            .map(|t| t.expected_publishers)
    }
}

impl MessageBus for SimBus {
    fn create_topic(&self, topic: &str, expected_publishers: usize) -> Result<(), EnvError> {
        let mut state = self.state();
        if state.closed {
            return Err(EnvError::Closed);
        }
        let entry = state.topics.entry(topic.to_string()).or_default();
        if entry.created {
            return Err(EnvError::TopicExists(topic.to_string()));
        }
        entry.created = true;
        entry.expected_publishers = expected_publishers;
        debug!(topic, expected_publishers, "Topic created");
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription, EnvError> {
        let mut state = self.state();
        if state.closed {
            return Err(EnvError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new(topic, rx);
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .push((subscription.id(), tx));
        Ok(subscription)
    }

    fn unsubscribe(&self, topic: &str, subscription: u64) -> Result<(), EnvError> {
        if let Some(entry) = self.state().topics.get_mut(topic) {
            entry.subscribers.retain(|(id, _)| *id != subscription);
        }
        debug!(topic, subscription, "Unsubscribed");
        Ok(())
    }

    fn publish(&self, topic: &str, sender: &str, payload: Vec<u8>) -> Result<(), EnvError> {
        let mut state = self.state();
        if state.closed {
            return Err(EnvError::Closed);
        }
        if state.blocked.contains(topic) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(EnvError::Partitioned(topic.to_string()));
        }
        let entry = match state.topics.get_mut(topic) {
            Some(entry) if entry.created => entry,
            _ => return Err(EnvError::topic_not_found(topic)),
        };

        let message = BusMessage::new(topic, sender, payload);
        // Drop subscribers whose receiving side went away
        entry.subscribers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl BusController for SimBus {
    fn block_topic(&self, topic: &str) {
        self.state().blocked.insert(topic.to_string());
    }

    fn unblock_topic(&self, topic: &str) {
        self.state().blocked.remove(topic);
    }

    fn heal_all(&self) {
        self.state().blocked.clear();
    }

    fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        // Dropping the senders ends every subscription
        for topic in state.topics.values_mut() {
            topic.subscribers.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = SimBus::new();
        let mut early = bus.subscribe("0-0R").unwrap();
        bus.create_topic("0-0R", 1).unwrap();
        let mut late = bus.subscribe("0-0R").unwrap();

        bus.publish("0-0R", "field", vec![1, 2]).unwrap();

        assert_eq!(early.try_recv().unwrap().payload, vec![1, 2]);
        assert_eq!(late.try_recv().unwrap().sender, "field");
        assert_eq!(bus.published(), 1);
        assert_eq!(bus.subscriber_count("0-0R"), 2);
        assert_eq!(bus.expected_publishers("0-0R"), Some(1));
    }

    #[test]
    fn test_topic_rules() {
        let bus = SimBus::new();
        let _sub = bus.subscribe("0-1L").unwrap();

        assert_eq!(
            bus.publish("0-1L", "field", vec![]),
            Err(EnvError::TopicNotFound("0-1L".into()))
        );
        bus.create_topic("0-1L", 1).unwrap();
        assert_eq!(
            bus.create_topic("0-1L", 1),
            Err(EnvError::TopicExists("0-1L".into()))
        );
        assert_eq!(bus.topics(), vec!["0-1L".to_string()]);
    }

    #[test]
    fn test_blocked_topic_drops_publishes() {
        let bus = SimBus::new();
        bus.create_topic("0-0R", 1).unwrap();
        let mut sub = bus.subscribe("0-0R").unwrap();

        bus.block_topic("0-0R");
        assert!(matches!(bus.publish("0-0R", "field", vec![9]), Err(EnvError::Partitioned(_))));
        assert!(sub.try_recv().is_none());
        assert_eq!(bus.dropped(), 1);

        bus.unblock_topic("0-0R");
        bus.publish("0-0R", "field", vec![9]).unwrap();
        assert!(sub.try_recv().is_some());

        bus.block_topic("0-0R");
        bus.heal_all();
        bus.publish("0-0R", "field", vec![10]).unwrap();
        assert_eq!(sub.try_recv().unwrap().payload, vec![10]);
        assert_eq!(bus.dropped(), 1);
    }

    #[test]
    fn test_unsubscribe_ends_only_that_subscription() {
        let bus = SimBus::new();
        bus.create_topic("0-1L", 1).unwrap();
        let mut gone = bus.subscribe("0-1L").unwrap();
        let mut kept = bus.subscribe("0-1L").unwrap();

        bus.publish("0-1L", "field", vec![1]).unwrap();
        bus.unsubscribe("0-1L", gone.id()).unwrap();
        bus.publish("0-1L", "field", vec![2]).unwrap();

        // Queued messages are still drained before the end
        assert_eq!(gone.recv_blocking().unwrap().payload, vec![1]);
        assert!(gone.recv_blocking().is_none());
        assert_eq!(kept.try_recv().unwrap().payload, vec![1]);
        assert_eq!(kept.try_recv().unwrap().payload, vec![2]);
        assert_eq!(bus.subscriber_count("0-1L"), 1);

        bus.close();
        assert!(bus.unsubscribe("0-1L", kept.id()).is_ok());
        assert!(bus.unsubscribe("missing", 99).is_ok());
    }

    #[test]
    fn test_close_ends_subscriptions() {
        let bus = SimBus::new();
        bus.create_topic("1-1U", 1).unwrap();
        let mut sub = bus.subscribe("1-1U").unwrap();

        bus.close();

        assert!(sub.recv_blocking().is_none());
        assert_eq!(bus.publish("1-1U", "field", vec![]), Err(EnvError::Closed));
        assert!(bus.subscribe("1-1U").is_err());
    }
}
