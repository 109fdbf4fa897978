//! dfield Core - Boundary-Region Partitioning & Step Synchronization
//!
//! Splits a global 2D field across peers and keeps them in lockstep:
//! 1. **Geometry**: remainder-fair tiling plus `aoi`-wide mine/out bands per neighbour
//! 2. **Exchange**: per-step snapshots of every band published to the neighbour
//! 3. **Gate**: a blocking collector releasing a step once every neighbour reported

pub mod boundary;
pub mod collector;
pub mod config;
pub mod error;
pub mod geometry;
pub mod listener;
pub mod region;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod synchro;

// Re-export key types for convenience
pub use boundary::{BandKind, BoundaryBand, BoundarySet, Placement};
pub use collector::{PendingUpdateCollector, StepUpdates};
pub use config::FieldConfig;
pub use error::SyncError;
pub use listener::Listener;
pub use geometry::{CellCoordinate, Direction, PartitionGeometry, Topology, TopologyMode};
pub use region::{Agent, AgentEntry, AgentId, Location, Rect, Region};
pub use scheduler::{Scheduler, StepSchedule};
pub use snapshot::{SenderKey, StepSnapshot};
pub use storage::{ContinuousStorage, FieldStorage, SparseGridStorage};
pub use synchro::{DistributedField, StepOutcome, SyncPhase};
