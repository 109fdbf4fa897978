//! The fixed set of regions a peer classifies agents into each step.
//!
//! Built once from a [`PartitionGeometry`]. Iterating "every mine band" or
//! "every out band" is a plain walk over the typed collection.

use crate::geometry::{CellCoordinate, Direction, PartitionGeometry};
use crate::region::{Agent, AgentEntry, AgentId, Rect, Region};

/// Which half of a boundary band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandKind {
    /// Owned border tile; simulated here and exported
    Mine,
    /// Neighbour territory; agents found here are handed over
    Out,
}

/// Where an agent was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Interior,
    Band { direction: Direction, kind: BandKind },
}

impl Placement {
    /// True if the agent stays owned by this peer.
    pub fn is_owned(&self) -> bool {
        !matches!(
            self,
            Placement::Band {
                kind: BandKind::Out,
                ..
            }
        )
    }
}

/// Mine/out pair facing one neighbour.
#[derive(Debug, Clone)]
pub struct BoundaryBand<A> {
    pub direction: Direction,
    pub neighbour: CellCoordinate,
    pub mine: Region<A>,
    pub out: Region<A>,
}

/// Interior region plus one band per present neighbour.
#[derive(Debug, Clone)]
pub struct BoundarySet<A> {
    interior: Region<A>,
    bands: Vec<BoundaryBand<A>>,
}

impl<A: Agent> BoundarySet<A> {
    pub fn from_geometry(geometry: &PartitionGeometry) -> Self {
        let region = |rect: Rect| -> Region<A> {
            match geometry.wrap() {
                Some(wrap) => Region::wrapping(rect, wrap),
                None => Region::new(rect),
            }
        };

        let bands = geometry
            .bands()
            .iter()
            .map(|b| BoundaryBand {
                direction: b.direction,
                neighbour: b.neighbour,
                mine: region(b.mine),
                out: region(b.out),
            })
            .collect();

        Self {
            interior: region(geometry.interior()),
            bands,
        }
    }

    /// Adds the entry to the first matching region.
    ///
    /// Priority: interior, mine bands (cardinal then diagonal), out bands in
    /// the same direction order. Returns `None` if nothing matches; the
    /// entry is then dropped. A second placement of the same agent within a
    /// step replaces the first.
    pub fn place(&mut self, entry: AgentEntry<A>) -> Option<Placement> {
        let (x, y) = (entry.location.x, entry.location.y);
        self.forget(entry.id());

        if self.interior.is_mine(x, y) {
            self.interior.add_agent(entry);
            return Some(Placement::Interior);
        }
        if let Some(band) = self.bands.iter_mut().find(|b| b.mine.is_mine(x, y)) {
            band.mine.add_agent(entry);
            return Some(Placement::Band {
                direction: band.direction,
                kind: BandKind::Mine,
            });
        }
        if let Some(band) = self.bands.iter_mut().find(|b| b.out.is_mine(x, y)) {
            band.out.add_agent(entry);
            return Some(Placement::Band {
                direction: band.direction,
                kind: BandKind::Out,
            });
        }
        None
    }

    /// Removes an agent from whichever region holds it.
    pub fn forget(&mut self, id: AgentId) -> Option<AgentEntry<A>> {
        if let Some(entry) = self.interior.remove(id) {
            return Some(entry);
        }
        self.bands
            .iter_mut()
            .find_map(|b| b.mine.remove(id).or_else(|| b.out.remove(id)))
    }

    pub fn interior(&self) -> &Region<A> {
        &self.interior
    }

    pub fn bands(&self) -> &[BoundaryBand<A>] {
        &self.bands
    }

    pub fn band(&self, direction: Direction) -> Option<&BoundaryBand<A>> {
        self.bands.iter().find(|b| b.direction == direction)
    }

    /// Interior followed by every mine band.
    pub fn owned_regions(&self) -> impl Iterator<Item = &Region<A>> {
        std::iter::once(&self.interior).chain(self.bands.iter().map(|b| &b.mine))
    }

    pub fn out_regions(&self) -> impl Iterator<Item = &Region<A>> {
        self.bands.iter().map(|b| &b.out)
    }

    /// Agents classified this step across all regions.
    pub fn len(&self) -> usize {
        self.owned_regions().chain(self.out_regions()).map(Region::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties every region; bounds are kept.
    pub fn clear(&mut self) {
        self.interior.clear();
        for band in &mut self.bands {
            band.mine.clear();
            band.out.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Topology;
    use crate::region::tests::Dot;
    use crate::region::Location;

    fn entry(id: u64, x: f64, y: f64) -> AgentEntry<Dot> {
        AgentEntry::new(Dot::new(id), Location::new(x, y))
    }

    fn three_by_three_center() -> BoundarySet<Dot> {
        let g = PartitionGeometry::new(90, 90, Topology::square(3, 3, false), CellCoordinate::new(1, 1), 5).unwrap();
        BoundarySet::from_geometry(&g)
    }

    #[test]
    fn test_classification_priority() {
        let mut set = three_by_three_center();

        assert_eq!(set.place(entry(1, 45.0, 45.0)), Some(Placement::Interior));
        assert_eq!(
            set.place(entry(2, 57.0, 45.0)),
            Some(Placement::Band {
                direction: Direction::East,
                kind: BandKind::Mine
            })
        );
        assert_eq!(
            set.place(entry(3, 57.0, 31.0)),
            Some(Placement::Band {
                direction: Direction::NorthEast,
                kind: BandKind::Mine
            })
        );
        assert_eq!(
            set.place(entry(4, 45.0, 27.0)),
            Some(Placement::Band {
                direction: Direction::North,
                kind: BandKind::Out
            })
        );
        assert_eq!(
            set.place(entry(5, 62.0, 27.0)),
            Some(Placement::Band {
                direction: Direction::NorthEast,
                kind: BandKind::Out
            })
        );

        assert_eq!(set.len(), 5);
        assert_eq!(set.owned_regions().map(Region::len).sum::<usize>(), 3);
    }

    #[test]
    fn test_unmatched_location_is_dropped() {
        let mut set = three_by_three_center();

        // Farther than one aoi from the owned rectangle
        assert_eq!(set.place(entry(9, 70.0, 45.0)), None);
        assert!(set.is_empty());
    }

    #[test]
    fn test_replacing_placement_moves_agent() {
        let mut set = three_by_three_center();
        set.place(entry(1, 57.0, 45.0));
        set.place(entry(1, 45.0, 45.0));

        assert_eq!(set.len(), 1);
        assert!(set.interior().contains_agent(AgentId(1)));
        assert!(set.band(Direction::East).unwrap().mine.is_empty());
    }

    #[test]
    fn test_clear_keeps_bounds() {
        let mut set = three_by_three_center();
        set.place(entry(1, 57.0, 45.0));
        let bounds = set.band(Direction::East).unwrap().mine.bounds();

        set.clear();

        assert!(set.is_empty());
        assert_eq!(set.band(Direction::East).unwrap().mine.bounds(), bounds);
        assert_eq!(set.bands().len(), 8);
    }

    #[test]
    fn test_toroidal_out_band_accepts_folded_location() {
        let g = PartitionGeometry::new(100, 10, Topology::linear(2, true), CellCoordinate::new(0, 0), 3).unwrap();
        let mut set: BoundarySet<Dot> = BoundarySet::from_geometry(&g);

        let placement = set.place(entry(1, 98.0, 5.0)).unwrap();
        assert_eq!(
            placement,
            Placement::Band {
                direction: Direction::West,
                kind: BandKind::Out
            }
        );
        assert!(!placement.is_owned());
    }
}
