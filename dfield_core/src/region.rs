//! Regions - rectangular (optionally ring-wrapped) coordinate ranges that
//! collect the agents classified into them during a step.
//!
//! A region never changes its bounds after creation. Its entry map is
//! filled during classification, cloned when a band is published, and
//! cleared once the step has been merged.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// AGENTS & LOCATIONS
// ============================================================================

/// Stable identity of an agent across peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An agent that can migrate between peers.
///
/// Agents travel inside step snapshots, so they must be serializable and
/// cheap enough to clone once per published band.
pub trait Agent: Clone + Send + Serialize + DeserializeOwned + 'static {
    /// Identity used to key regions, storage and the scheduler.
    fn id(&self) -> AgentId;
}

/// A point in global field coordinates.
///
/// Discrete grids use integer-valued coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// An agent together with the location it reported this step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry<A> {
    pub agent: A,
    pub location: Location,
}

impl<A: Agent> AgentEntry<A> {
    pub fn new(agent: A, location: Location) -> Self {
        Self { agent, location }
    }

    pub fn id(&self) -> AgentId {
        self.agent.id()
    }
}

// ============================================================================
// RECTANGLES
// ============================================================================

/// Half-open rectangle `[x0, x1) x [y0, y1)`.
///
/// Bounds of out bands may extend past the field edges on a toroidal
/// field; membership then wraps (see [`Region::is_mine`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    /// Plain containment, without wraparound.
    pub fn contains(&self, location: Location) -> bool {
        location.x >= self.x0 && location.x < self.x1 && location.y >= self.y0 && location.y < self.y1
    }
}

/// Global field extent used to fold coordinates on a toroidal field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wrap {
    pub width: f64,
    pub height: f64,
}

fn axis_contains(lo: f64, hi: f64, v: f64, span: Option<f64>) -> bool {
    if v >= lo && v < hi {
        return true;
    }
    match span {
        Some(s) => (v + s >= lo && v + s < hi) || (v - s >= lo && v - s < hi),
        None => false,
    }
}

// ============================================================================
// REGION
// ============================================================================

/// A rectangle plus the agents classified into it this step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "A: Agent")]
pub struct Region<A> {
    bounds: Rect,
    wrap: Option<Wrap>,
    #[serde(with = "entry_list")]
    entries: BTreeMap<AgentId, AgentEntry<A>>,
}

impl<A: Agent> Region<A> {
    /// Creates an empty region on a bounded field.
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            wrap: None,
            entries: BTreeMap::new(),
        }
    }

    /// Creates an empty region whose membership wraps around the field.
    pub fn wrapping(bounds: Rect, wrap: Wrap) -> Self {
        Self {
            bounds,
            wrap: Some(wrap),
            entries: BTreeMap::new(),
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Membership test honouring wraparound.
    pub fn is_mine(&self, x: f64, y: f64) -> bool {
        axis_contains(self.bounds.x0, self.bounds.x1, x, self.wrap.map(|w| w.width))
            && axis_contains(self.bounds.y0, self.bounds.y1, y, self.wrap.map(|w| w.height))
    }

    /// Adds an entry if its location lies inside the region.
    ///
    /// Returns `false` (and keeps nothing) when the location is outside;
    /// coordinates are never clamped. Re-adding an agent replaces its entry.
    pub fn add_agent(&mut self, entry: AgentEntry<A>) -> bool {
        if !self.is_mine(entry.location.x, entry.location.y) {
            return false;
        }
        self.entries.insert(entry.id(), entry);
        true
    }

    pub fn remove(&mut self, id: AgentId) -> Option<AgentEntry<A>> {
        self.entries.remove(&id)
    }

    pub fn contains_agent(&self, id: AgentId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Entries in agent-id order.
    pub fn values(&self) -> impl Iterator<Item = &AgentEntry<A>> {
        self.entries.values()
    }

    pub fn into_values(self) -> impl Iterator<Item = AgentEntry<A>> {
        self.entries.into_values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Entries travel as a list; the map is rebuilt from agent ids on decode.
mod entry_list {
    use super::{Agent, AgentEntry, AgentId};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S, A>(entries: &BTreeMap<AgentId, AgentEntry<A>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        A: Agent,
    {
        serializer.collect_seq(entries.values())
    }

    pub fn deserialize<'de, D, A>(deserializer: D) -> Result<BTreeMap<AgentId, AgentEntry<A>>, D::Error>
    where
        D: Deserializer<'de>,
        A: Agent,
    {
        let list = Vec::<AgentEntry<A>>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|entry| (entry.id(), entry)).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal agent used across the crate's tests.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Dot {
        pub id: u64,
        pub label: String,
    }

    impl Dot {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                label: format!("dot-{}", id),
            }
        }
    }

    impl Agent for Dot {
        fn id(&self) -> AgentId {
            AgentId(self.id)
        }
    }

    fn entry(id: u64, x: f64, y: f64) -> AgentEntry<Dot> {
        AgentEntry::new(Dot::new(id), Location::new(x, y))
    }

    #[test]
    fn test_membership_is_half_open() {
        let region: Region<Dot> = Region::new(Rect::new(47.0, 0.0, 50.0, 10.0));

        assert!(region.is_mine(47.0, 0.0));
        assert!(region.is_mine(49.999, 9.999));
        assert!(!region.is_mine(50.0, 5.0));
        assert!(!region.is_mine(48.0, 10.0));
        assert!(!region.is_mine(46.9, 5.0));
    }

    #[test]
    fn test_add_agent_rejects_outside_locations() {
        let mut region = Region::new(Rect::new(0.0, 0.0, 10.0, 10.0));

        assert!(region.add_agent(entry(1, 5.0, 5.0)));
        assert!(!region.add_agent(entry(2, 10.0, 5.0)));
        assert!(!region.add_agent(entry(3, -0.5, 5.0)));

        assert_eq!(region.len(), 1);
        assert!(region.contains_agent(AgentId(1)));
        assert!(!region.contains_agent(AgentId(2)));
    }

    #[test]
    fn test_readding_replaces_entry() {
        let mut region = Region::new(Rect::new(0.0, 0.0, 10.0, 10.0));
        region.add_agent(entry(1, 1.0, 1.0));
        region.add_agent(entry(1, 2.0, 3.0));

        assert_eq!(region.len(), 1);
        let only = region.values().next().unwrap();
        assert_eq!(only.location, Location::new(2.0, 3.0));
    }

    #[test]
    fn test_wrapping_membership() {
        // West out band of the leftmost peer on a 100-wide torus
        let wrap = Wrap { width: 100.0, height: 10.0 };
        let region: Region<Dot> = Region::wrapping(Rect::new(-3.0, 0.0, 0.0, 10.0), wrap);

        assert!(region.is_mine(97.0, 5.0));
        assert!(region.is_mine(99.5, 0.0));
        assert!(region.is_mine(-1.0, 5.0));
        assert!(!region.is_mine(96.9, 5.0));
        assert!(!region.is_mine(0.0, 5.0));
    }

    #[test]
    fn test_clone_is_detached() {
        let mut region = Region::new(Rect::new(0.0, 0.0, 10.0, 10.0));
        region.add_agent(entry(1, 1.0, 1.0));

        let snapshot = region.clone();
        region.clear();
        region.add_agent(entry(2, 2.0, 2.0));

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_agent(AgentId(1)));
        assert!(!snapshot.contains_agent(AgentId(2)));
    }

    #[test]
    fn test_region_serializes_entries_as_list() {
        let mut region = Region::new(Rect::new(0.0, 0.0, 10.0, 10.0));
        region.add_agent(entry(7, 1.5, 2.5));
        region.add_agent(entry(3, 4.0, 4.0));

        let json = serde_json::to_value(&region).unwrap();
        assert!(json["entries"].is_array());
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);

        let back: Region<Dot> = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.bounds(), region.bounds());
        let ids: Vec<AgentId> = back.values().map(|e| e.id()).collect();
        assert_eq!(ids, vec![AgentId(3), AgentId(7)]);
    }

    #[test]
    fn test_rect_area() {
        let rect = Rect::new(47.0, 0.0, 50.0, 10.0);
        approx::assert_relative_eq!(rect.area(), 30.0);
        assert!(Rect::new(5.0, 0.0, 5.0, 10.0).is_empty());
    }
}
