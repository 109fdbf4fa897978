//! Error types for partition setup and step synchronization.

use crate::region::AgentId;
use dfield_env::EnvError;
use thiserror::Error;

/// Errors raised by a distributed field peer.
///
/// A forced unblock is not an error: it surfaces as
/// [`StepUpdates::Aborted`](crate::collector::StepUpdates::Aborted).
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid geometry or topology; fatal at peer startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The bus rejected a snapshot publish
    #[error("Publish to {topic} failed at step {step}: {source}")]
    Publish {
        topic: String,
        step: u64,
        #[source]
        source: EnvError,
    },

    /// An agent location matched neither the interior nor any band
    #[error("Agent {agent} at ({x}, {y}) matches no region of this peer")]
    Misclassified { agent: AgentId, x: f64, y: f64 },

    /// The collector lock was poisoned while waiting
    #[error("Wait for neighbour updates was interrupted")]
    InterruptedWait,

    /// A step snapshot could not be encoded or decoded
    #[error("Snapshot codec error: {0}")]
    Codec(String),

    /// A listener thread could not be started
    #[error("Failed to spawn listener for {topic}: {source}")]
    Spawn {
        topic: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Env(#[from] EnvError),
}

impl SyncError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for errors that must stop the peer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InterruptedWait | Self::Spawn { .. }
        )
    }
}
