//! Step snapshots - the per-step payload one peer hands to a neighbour.

use crate::error::SyncError;
use crate::geometry::{CellCoordinate, Direction};
use crate::region::{Agent, Region};
use serde::{Deserialize, Serialize};

/// Identity of a snapshot publisher within one step.
///
/// Keyed by direction as well as cell: on a two-wide ring the same
/// neighbour faces us from both sides and must count twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SenderKey {
    pub cell: CellCoordinate,
    /// Direction from the sender's point of view
    pub direction: Direction,
}

impl std::fmt::Display for SenderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.cell, self.direction.code())
    }
}

/// What a peer publishes towards one neighbour at the end of a step.
///
/// `mine` holds the sender's border agents (read-only ghosts for the
/// receiver); `out` holds agents that crossed into the receiver's territory
/// and now belong to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "A: Agent")]
pub struct StepSnapshot<A> {
    pub mine: Region<A>,
    pub out: Region<A>,
    pub step: u64,
    pub sender: CellCoordinate,
    pub direction: Direction,
}

impl<A: Agent> StepSnapshot<A> {
    pub fn key(&self) -> SenderKey {
        SenderKey {
            cell: self.sender,
            direction: self.direction,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(|e| SyncError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Codec(e.to_string()))
    }
}
