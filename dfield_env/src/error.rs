//! Error types for the distributed field environment abstraction.

use thiserror::Error;

/// Errors that can occur while talking to the message bus.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvError {
    /// The topic has not been created and cannot be resolved
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// The topic was already created by another owner
    #[error("Topic already exists: {0}")]
    TopicExists(String),

    /// The bus rejected a publish (buffer full, subscriber gone, etc.)
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Delivery on this topic is currently blocked (simulated fault)
    #[error("Topic partitioned: {0}")]
    Partitioned(String),

    /// The bus has been shut down
    #[error("Bus closed")]
    Closed,

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EnvError {
    /// Creates a publish error.
    pub fn publish(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Creates a topic-not-found error.
    pub fn topic_not_found(topic: impl std::fmt::Display) -> Self {
        Self::TopicNotFound(topic.to_string())
    }
}
