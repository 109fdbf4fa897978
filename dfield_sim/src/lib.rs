//! dfield Simulation Harness
//!
//! Runs every peer of a partitioned field in one process, wired through an
//! in-memory bus, and checks that agents survive handovers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌─────────┐   snapshots   ┌─────────┐                      │
//! │  │ Peer 0-0│◄─────────────►│ Peer 0-1│     ...              │
//! │  │ Walkers │               │ Walkers │                      │
//! │  └────┬────┘               └────┬────┘                      │
//! │       │                         │                           │
//! │  ┌────▼─────────────────────────▼────┐                      │
//! │  │   SimBus (topics, blocked set)    │                      │
//! │  └───────────────────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dfield_sim::{SimWorld, SimConfig};
//!
//! let config = SimConfig {
//!     seed: 42,
//!     agents_per_peer: 10,
//!     ..Default::default()
//! };
//!
//! let report = SimWorld::new(config).run()?;
//! ```

mod agent;
mod bus;
mod runner;
mod world;
pub mod scenarios;

pub use agent::Walker;
pub use bus::SimBus;
pub use runner::{owned_after, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{PeerReport, SimConfig, SimError, SimWorld, WorldReport};
