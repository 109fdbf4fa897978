//! Publish/subscribe bus abstraction for distributed field peers.

use crate::error::EnvError;
use crate::types::Subscription;

/// Abstraction for the topic-based message bus connecting peers.
///
/// # Implementations
///
/// - **Production**: Wraps a broker client (JMS, MQTT, NATS, ...)
/// - **Simulation**: In-process channels with fault injection
///
/// # Message Flow
///
/// ```text
/// Peer 0-0                     Bus                       Peer 0-1
///   |                           |                           |
///   |-- create_topic("0-0R") -->|                           |
///   |                           |<-- subscribe("0-0R") -----|
///   |-- publish("0-0R", ..) --->|                           |
///   |                           |------------------------>  |-- recv_blocking() -> msg
/// ```
///
/// Publishing is fire-and-forget: `Ok(())` means the bus accepted the
/// message, not that any subscriber processed it.
pub trait MessageBus: Send + Sync + 'static {
    /// Declares a topic this peer will publish on.
    ///
    /// # Arguments
    /// * `topic` - Topic name
    /// * `expected_publishers` - How many distinct publishers will write to it
    fn create_topic(&self, topic: &str, expected_publishers: usize) -> Result<(), EnvError>;

    /// Subscribes to a topic, returning a blocking receiver.
    ///
    /// A neighbour may subscribe before the owner has created the topic.
    fn subscribe(&self, topic: &str) -> Result<Subscription, EnvError>;

    /// Ends one subscription; its `recv_blocking` returns `None` once the
    /// queued messages are drained.
    ///
    /// Unknown ids are ignored. Must succeed on a closed bus.
    fn unsubscribe(&self, topic: &str, subscription: u64) -> Result<(), EnvError>;

    /// Publishes an opaque payload on a topic.
    ///
    /// # Returns
    /// * `Ok(())` - Message queued for every current subscriber
    /// * `Err(EnvError)` - Immediate failure; the caller decides whether to retry
    fn publish(&self, topic: &str, sender: &str, payload: Vec<u8>) -> Result<(), EnvError>;
}

/// Fault injection hooks for buses used in simulation.
pub trait BusController: Send + Sync {
    /// Drops every publish on `topic` until unblocked.
    fn block_topic(&self, topic: &str);

    /// Restores delivery on `topic`.
    fn unblock_topic(&self, topic: &str);

    /// Restores delivery on all topics.
    fn heal_all(&self);

    /// Shuts the bus down; subscriptions end and publishes fail.
    fn close(&self);
}
