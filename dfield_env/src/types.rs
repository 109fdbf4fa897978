//! Common types for the bus abstraction.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Envelope for a message delivered on a topic.
///
/// The payload is opaque to the bus; the receiving field decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,

    /// Publisher identity (the sending field's name)
    pub sender: String,

    /// Encoded payload bytes
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Creates a new envelope.
    pub fn new(topic: impl Into<String>, sender: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            sender: sender.into(),
            payload,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// A live subscription to one topic.
///
/// Listener threads block on [`Subscription::recv_blocking`]; it returns
/// `None` once the bus drops the sending side (unsubscribed, topic closed
/// or bus shut down).
#[derive(Debug)]
pub struct Subscription {
    topic: String,

    /// Process-unique id, used to unsubscribe
    id: u64,

    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    /// Wraps the receiving half of a topic channel and assigns a fresh id.
    pub fn new(topic: impl Into<String>, rx: mpsc::UnboundedReceiver<BusMessage>) -> Self {
        Self {
            topic: topic.into(),
            id: NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed),
            rx,
        }
    }

    /// The topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocks the calling thread until the next message arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn recv_blocking(&mut self) -> Option<BusMessage> {
        self.rx.blocking_recv()
    }

    /// Returns the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}
