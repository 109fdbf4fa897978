//! Walker - a random-walk agent used to drive the harness.
//!
//! Each step a walker shifts by a uniform offset on both axes. The offset
//! is bounded by `max_shift`, which the harness keeps below the aoi so a
//! walker can never skip past a boundary band. Crowded walkers (more
//! neighbours within the aoi than `crowd_limit`, ghosts included) take full
//! strides; others take half strides.

use dfield_core::{Agent, AgentId, Location, PartitionGeometry};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A random-walk agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Walker {
    id: u64,

    /// Largest per-axis shift in one step
    max_shift: f64,

    /// Neighbour count above which the walker takes full strides
    crowd_limit: usize,

    /// Steps this walker has run, across every peer that hosted it
    steps_taken: u64,
}

impl Walker {
    /// Creates a walker.
    pub fn new(id: u64, max_shift: f64) -> Self {
        Self {
            id,
            max_shift,
            crowd_limit: 3,
            steps_taken: 0,
        }
    }

    pub fn with_crowd_limit(mut self, limit: usize) -> Self {
        self.crowd_limit = limit;
        self
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// Picks the next location.
    ///
    /// On a bounded field, an axis whose move would leave the field keeps
    /// its coordinate; on a toroidal field the move wraps.
    ///
    /// # Arguments
    /// * `from` - Current location
    /// * `neighbours` - Other agents seen within the aoi
    /// * `field` - Geometry of the hosting peer
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        from: Location,
        neighbours: usize,
        field: &PartitionGeometry,
        rng: &mut R,
    ) -> Location {
        self.steps_taken += 1;

        let reach = if neighbours > self.crowd_limit {
            self.max_shift
        } else {
            self.max_shift * 0.5
        };
        let (width, height) = field.field_size();
        let toroidal = field.topology().toroidal;

        let x = axis_move(from.x, rng.gen_range(-reach..=reach), width as f64, toroidal);
        let y = axis_move(from.y, rng.gen_range(-reach..=reach), height as f64, toroidal);
        field.normalize(Location::new(x, y))
    }
}

fn axis_move(from: f64, delta: f64, extent: f64, toroidal: bool) -> f64 {
    let to = from + delta;
    if toroidal || (0.0..extent).contains(&to) {
        to
    } else {
        from
    }
}

impl Agent for Walker {
    fn id(&self) -> AgentId {
        AgentId(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfield_core::{CellCoordinate, Topology};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn strip(toroidal: bool) -> PartitionGeometry {
        PartitionGeometry::new(100, 10, Topology::linear(2, toroidal), CellCoordinate::new(0, 0), 3).unwrap()
    }

    #[test]
    fn test_step_stays_within_max_shift() {
        let field = strip(false);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut walker = Walker::new(1, 2.7);
        let mut at = Location::new(20.0, 5.0);

        for _ in 0..500 {
            let next = walker.step(at, 10, &field, &mut rng);
            assert!((next.x - at.x).abs() <= 2.7 + 1e-9);
            assert!((next.y - at.y).abs() <= 2.7 + 1e-9);
            assert!(field.in_field(next));
            at = next;
        }
        assert_eq!(walker.steps_taken(), 500);
    }

    #[test]
    fn test_quiet_walker_takes_half_strides() {
        let field = strip(false);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut walker = Walker::new(1, 2.0).with_crowd_limit(5);

        for _ in 0..200 {
            let next = walker.step(Location::new(20.0, 5.0), 0, &field, &mut rng);
            assert!((next.x - 20.0).abs() <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_bounded_edge_keeps_coordinate() {
        let field = strip(false);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut walker = Walker::new(1, 2.0);

        for _ in 0..200 {
            let next = walker.step(Location::new(0.5, 0.5), 10, &field, &mut rng);
            assert!(next.x >= 0.0 && next.y >= 0.0);
        }
    }

    #[test]
    fn test_toroidal_edge_wraps() {
        let field = strip(true);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut walker = Walker::new(1, 2.0);
        let mut wrapped = false;

        for _ in 0..200 {
            let next = walker.step(Location::new(0.1, 5.0), 10, &field, &mut rng);
            assert!(field.in_field(next));
            wrapped |= next.x > 90.0;
        }
        assert!(wrapped);
    }

    proptest::proptest! {
        #[test]
        fn test_step_never_leaves_bounded_field(
            seed in 0u64..1000,
            x in 0.0f64..100.0,
            y in 0.0f64..10.0,
            neighbours in 0usize..8,
        ) {
            let field = strip(false);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut walker = Walker::new(1, 2.7);

            let next = walker.step(Location::new(x, y), neighbours, &field, &mut rng);
            proptest::prop_assert!(field.in_field(next));
            proptest::prop_assert!((next.x - x).abs() <= 2.7 + 1e-9);
        }
    }

    #[test]
    fn test_walker_round_trips_as_json() {
        let walker = Walker::new(4, 1.5).with_crowd_limit(2);
        let json = serde_json::to_string(&walker).unwrap();
        let back: Walker = serde_json::from_str(&json).unwrap();
        assert_eq!(back, walker);
        assert_eq!(back.id(), AgentId(4));
    }
}
