//! Listener threads: one per subscribed neighbour topic.
//!
//! A listener only decodes snapshots and feeds the collector; it never
//! touches regions or storage.

use crate::collector::PendingUpdateCollector;
use crate::error::SyncError;
use crate::region::Agent;
use crate::snapshot::StepSnapshot;
use dfield_env::Subscription;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A running listener thread and the subscription it drains.
#[derive(Debug)]
pub struct Listener {
    topic: String,
    subscription: u64,
    handle: JoinHandle<()>,
}

impl Listener {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Id to pass to `MessageBus::unsubscribe`.
    pub fn subscription(&self) -> u64 {
        self.subscription
    }

    /// Waits for the thread; it ends once its subscription ends.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

/// Spawns a thread draining `subscription` into `collector`.
///
/// Messages from publishers other than `field_name` are ignored (several
/// fields may share a bus). The thread exits when the subscription ends or
/// the collector is closed.
pub fn spawn_listener<A: Agent>(
    mut subscription: Subscription,
    field_name: String,
    collector: Arc<PendingUpdateCollector<StepSnapshot<A>>>,
) -> Result<Listener, SyncError> {
    let topic = subscription.topic().to_string();
    let id = subscription.id();

    thread::Builder::new()
        .name(format!("dfield-listener-{}", topic))
        .spawn(move || {
            debug!(topic = %subscription.topic(), "Listener started");

            while let Some(message) = subscription.recv_blocking() {
                if message.sender != field_name {
                    continue;
                }
                let snapshot = match StepSnapshot::<A>::decode(&message.payload) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(topic = %message.topic, error = %e, "Dropping undecodable snapshot");
                        continue;
                    }
                };
                match collector.put(snapshot.step, snapshot.key(), snapshot) {
                    Ok(_) if collector.is_closed() => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(topic = %message.topic, error = %e, "Collector unavailable");
                        break;
                    }
                }
            }

            debug!(topic = %subscription.topic(), "Listener stopped");
        })
        .map(|handle| Listener {
            topic: topic.clone(),
            subscription: id,
            handle,
        })
        .map_err(|source| SyncError::Spawn { topic, source })
}
