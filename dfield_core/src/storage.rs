//! Field storage backends.
//!
//! The synchronizer only needs insert/remove/lookup; spatial indexing is the
//! backend's business. Both backends bucket agents into square cells:
//! `SparseGridStorage` uses unit cells over integer coordinates,
//! `ContinuousStorage` a configurable discretization over real ones.

use crate::region::{Agent, AgentEntry, AgentId, Location};
use std::collections::HashMap;

/// Storage capability used by the synchronizer.
pub trait FieldStorage<A: Agent> {
    /// Places `agent` at `location`, replacing any earlier entry for it.
    fn insert(&mut self, agent: A, location: Location);

    /// Removes an agent, returning its last entry.
    fn remove(&mut self, id: AgentId) -> Option<AgentEntry<A>>;

    /// Agents at `location`.
    fn lookup(&self, location: Location) -> Vec<&A>;

    /// Entries within `radius` (Chebyshev) of `center`.
    fn within(&self, center: Location, radius: f64) -> Vec<&AgentEntry<A>>;

    fn location_of(&self, id: AgentId) -> Option<Location>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type BucketKey = (i64, i64);

/// Agent map plus a coarse bucket grid over it.
#[derive(Debug, Clone)]
struct BucketIndex<A> {
    cell_size: f64,
    entries: HashMap<AgentId, AgentEntry<A>>,
    buckets: HashMap<BucketKey, Vec<AgentId>>,
}

impl<A: Agent> BucketIndex<A> {
    fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            entries: HashMap::new(),
            buckets: HashMap::new(),
        }
    }

    fn key(&self, location: Location) -> BucketKey {
        (
            (location.x / self.cell_size).floor() as i64,
            (location.y / self.cell_size).floor() as i64,
        )
    }

    fn insert(&mut self, agent: A, location: Location) {
        let id = agent.id();
        self.remove(id);
        let key = self.key(location);
        self.buckets.entry(key).or_default().push(id);
        self.entries.insert(id, AgentEntry::new(agent, location));
    }

    fn remove(&mut self, id: AgentId) -> Option<AgentEntry<A>> {
        let entry = self.entries.remove(&id)?;
        let key = self.key(entry.location);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|other| *other != id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        Some(entry)
    }

    fn bucket(&self, key: BucketKey) -> impl Iterator<Item = &AgentEntry<A>> {
        self.buckets
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id))
    }

    fn within(&self, center: Location, radius: f64) -> Vec<&AgentEntry<A>> {
        let (lo_x, lo_y) = self.key(Location::new(center.x - radius, center.y - radius));
        let (hi_x, hi_y) = self.key(Location::new(center.x + radius, center.y + radius));

        let mut found: Vec<&AgentEntry<A>> = (lo_x..=hi_x)
            .flat_map(|bx| (lo_y..=hi_y).map(move |by| (bx, by)))
            .flat_map(|key| self.bucket(key))
            .filter(|e| {
                (e.location.x - center.x).abs() <= radius && (e.location.y - center.y).abs() <= radius
            })
            .collect();
        found.sort_by_key(|e| e.id());
        found
    }
}

// ============================================================================
// SPARSE GRID
// ============================================================================

/// Discrete grid where any number of agents may share a cell.
///
/// Locations are truncated to their integer cell.
#[derive(Debug, Clone)]
pub struct SparseGridStorage<A> {
    index: BucketIndex<A>,
}

impl<A: Agent> Default for SparseGridStorage<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Agent> SparseGridStorage<A> {
    pub fn new() -> Self {
        Self {
            index: BucketIndex::new(1.0),
        }
    }

    fn cell(location: Location) -> Location {
        Location::new(location.x.floor(), location.y.floor())
    }
}

impl<A: Agent> FieldStorage<A> for SparseGridStorage<A> {
    fn insert(&mut self, agent: A, location: Location) {
        self.index.insert(agent, Self::cell(location));
    }

    fn remove(&mut self, id: AgentId) -> Option<AgentEntry<A>> {
        self.index.remove(id)
    }

    fn lookup(&self, location: Location) -> Vec<&A> {
        let key = self.index.key(Self::cell(location));
        let mut agents: Vec<&A> = self.index.bucket(key).map(|e| &e.agent).collect();
        agents.sort_by_key(|a| a.id());
        agents
    }

    fn within(&self, center: Location, radius: f64) -> Vec<&AgentEntry<A>> {
        self.index.within(Self::cell(center), radius.floor())
    }

    fn location_of(&self, id: AgentId) -> Option<Location> {
        self.index.entries.get(&id).map(|e| e.location)
    }

    fn len(&self) -> usize {
        self.index.entries.len()
    }
}

// ============================================================================
// CONTINUOUS
// ============================================================================

/// Real-valued field; agents are bucketed by `discretization` for neighbour queries.
#[derive(Debug, Clone)]
pub struct ContinuousStorage<A> {
    index: BucketIndex<A>,
}

impl<A: Agent> ContinuousStorage<A> {
    /// `discretization` is the bucket edge length; usually the aoi.
    pub fn new(discretization: f64) -> Self {
        Self {
            index: BucketIndex::new(discretization.max(f64::EPSILON)),
        }
    }

    pub fn discretization(&self) -> f64 {
        self.index.cell_size
    }
}

impl<A: Agent> FieldStorage<A> for ContinuousStorage<A> {
    fn insert(&mut self, agent: A, location: Location) {
        self.index.insert(agent, location);
    }

    fn remove(&mut self, id: AgentId) -> Option<AgentEntry<A>> {
        self.index.remove(id)
    }

    /// Agents at exactly `location`.
    fn lookup(&self, location: Location) -> Vec<&A> {
        let mut agents: Vec<&A> = self
            .index
            .bucket(self.index.key(location))
            .filter(|e| e.location == location)
            .map(|e| &e.agent)
            .collect();
        agents.sort_by_key(|a| a.id());
        agents
    }

    fn within(&self, center: Location, radius: f64) -> Vec<&AgentEntry<A>> {
        self.index.within(center, radius)
    }

    fn location_of(&self, id: AgentId) -> Option<Location> {
        self.index.entries.get(&id).map(|e| e.location)
    }

    fn len(&self) -> usize {
        self.index.entries.len()
    }
}
