//! Distributed Field Environment Abstraction Layer
//!
//! This crate holds the collaborator interfaces a distributed field peer
//! talks to, so the synchronization protocol can run against a real broker
//! in production and against in-process channels in simulation.
//!
//! # Core Concept: Topics Per Border
//!
//! Every peer owns one topic per neighbouring direction and subscribes to
//! the matching topic of each neighbour:
//! - Publish: `create_topic()`, `publish()`
//! - Receive: `subscribe()` then `Subscription::recv_blocking()` on a listener thread
//!
//! # Example
//!
//! ```ignore
//! use dfield_env::MessageBus;
//!
//! fn wire<B: MessageBus>(bus: &B) -> Result<(), dfield_env::EnvError> {
//!     bus.create_topic("0-0R", 1)?;
//!     let mut sub = bus.subscribe("0-1L")?;
//!     std::thread::spawn(move || {
//!         while let Some(msg) = sub.recv_blocking() {
//!             handle(msg);
//!         }
//!     });
//!     Ok(())
//! }
//! ```

mod bus;
mod types;
mod error;

pub use bus::{BusController, MessageBus};
pub use types::{BusMessage, Subscription};
pub use error::EnvError;
