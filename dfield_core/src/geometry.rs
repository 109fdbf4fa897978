//! Partition geometry - which rectangle of the global field a peer owns and
//! where its boundary bands lie.
//!
//! # Layout
//!
//! The field is tiled into `rows x columns` cells. Remainder units go to the
//! lower-index cells first, so a 100-wide field over 3 columns yields widths
//! 34, 33, 33.
//!
//! Around the owned rectangle every neighbouring direction gets a pair of
//! bands, each `aoi` wide:
//!
//! ```text
//!            NW out |       N out        | NE out
//!           --------+--------------------+--------
//!                   |NW |   N mine   |NE |
//!                   |---+------------+---|
//!             W out | W |  interior  | E | E out
//!                   |---+------------+---|
//!                   |SW |   S mine   |SE |
//!           --------+--------------------+--------
//!            SW out |       S out        | SE out
//! ```
//!
//! Mine tiles split the border ring of the owned rectangle (corner tiles
//! belong to the diagonal direction). Out bands sit outside it and land in
//! the neighbour's territory. On a side without a neighbour there is no
//! band and the interior extends to the edge.

use crate::config::FieldConfig;
use crate::error::SyncError;
use crate::region::{Location, Rect, Wrap};
use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// CELLS & DIRECTIONS
// ============================================================================

/// A peer's position in the logical topology grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoordinate {
    pub row: u32,
    pub col: u32,
}

impl CellCoordinate {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for CellCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.row, self.col)
    }
}

/// A neighbouring side or corner of a cell.
///
/// North is the row above (`row - 1`), west the column to the left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    West,
    East,
    North,
    South,
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

impl Direction {
    /// Every direction in classification priority order: cardinals, then diagonals.
    pub const ALL: [Direction; 8] = [
        Direction::West,
        Direction::East,
        Direction::North,
        Direction::South,
        Direction::NorthWest,
        Direction::NorthEast,
        Direction::SouthWest,
        Direction::SouthEast,
    ];

    /// Suffix used in topic names.
    pub fn code(&self) -> &'static str {
        match self {
            Direction::West => "L",
            Direction::East => "R",
            Direction::North => "U",
            Direction::South => "D",
            Direction::NorthWest => "CUDL",
            Direction::NorthEast => "CUDR",
            Direction::SouthWest => "CDDL",
            Direction::SouthEast => "CDDR",
        }
    }

    /// `(dx, dy)` step in columns and rows.
    pub fn offset(&self) -> (i64, i64) {
        match self {
            Direction::West => (-1, 0),
            Direction::East => (1, 0),
            Direction::North => (0, -1),
            Direction::South => (0, 1),
            Direction::NorthWest => (-1, -1),
            Direction::NorthEast => (1, -1),
            Direction::SouthWest => (-1, 1),
            Direction::SouthEast => (1, 1),
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::NorthWest => Direction::SouthEast,
            Direction::NorthEast => Direction::SouthWest,
            Direction::SouthWest => Direction::NorthEast,
            Direction::SouthEast => Direction::NorthWest,
        }
    }

    pub fn is_diagonal(&self) -> bool {
        let (dx, dy) = self.offset();
        dx != 0 && dy != 0
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// TOPOLOGY
// ============================================================================

/// How peers are arranged over the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    /// A single row of vertical strips
    Linear,
    /// A `rows x columns` grid
    Square,
    /// A square grid whose cells may later be rebalanced
    SquareBalanced,
}

/// Logical peer grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub mode: TopologyMode,
    pub rows: u32,
    pub columns: u32,
    /// Field wraps at its edges
    pub toroidal: bool,
}

impl Topology {
    /// `columns` vertical strips side by side.
    pub fn linear(columns: u32, toroidal: bool) -> Self {
        Self {
            mode: TopologyMode::Linear,
            rows: 1,
            columns,
            toroidal,
        }
    }

    pub fn square(rows: u32, columns: u32, toroidal: bool) -> Self {
        Self {
            mode: TopologyMode::Square,
            rows,
            columns,
            toroidal,
        }
    }

    /// Builds a `k x k` grid from a peer count that must be a perfect square.
    pub fn square_from_peers(peers: u32, toroidal: bool) -> Result<Self, SyncError> {
        let side = (peers as f64).sqrt().round() as u32;
        if peers == 0 || side * side != peers {
            return Err(SyncError::configuration(format!(
                "{} peers cannot form a square topology",
                peers
            )));
        }
        Ok(Self::square(side, side, toroidal))
    }

    pub fn peer_count(&self) -> u32 {
        self.rows * self.columns
    }

    /// Every cell of the grid in row-major order.
    pub fn cells(&self) -> Vec<CellCoordinate> {
        (0..self.rows)
            .flat_map(|row| (0..self.columns).map(move |col| CellCoordinate::new(row, col)))
            .collect()
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.rows == 0 || self.columns == 0 {
            return Err(SyncError::configuration("topology needs at least one row and column"));
        }
        match self.mode {
            TopologyMode::Linear if self.rows != 1 => Err(SyncError::configuration(format!(
                "linear topology must have one row, got {}",
                self.rows
            ))),
            TopologyMode::SquareBalanced if self.rows != self.columns => {
                Err(SyncError::configuration(format!(
                    "balanced topology must be square, got {}x{}",
                    self.rows, self.columns
                )))
            }
            _ => Ok(()),
        }
    }

    /// The cell one step away in `direction`, if any.
    ///
    /// On a toroidal field indices wrap, except along an axis with a single
    /// partition (a cell is never its own neighbour).
    pub fn neighbour(&self, cell: CellCoordinate, direction: Direction) -> Option<CellCoordinate> {
        let (dx, dy) = direction.offset();
        let col = step_index(cell.col, dx, self.columns, self.toroidal)?;
        let row = step_index(cell.row, dy, self.rows, self.toroidal)?;
        Some(CellCoordinate::new(row, col))
    }
}

fn step_index(index: u32, delta: i64, parts: u32, toroidal: bool) -> Option<u32> {
    if delta == 0 {
        return Some(index);
    }
    if parts < 2 {
        return None;
    }
    let moved = index as i64 + delta;
    if (0..parts as i64).contains(&moved) {
        Some(moved as u32)
    } else if toroidal {
        Some(moved.rem_euclid(parts as i64) as u32)
    } else {
        None
    }
}

/// Origin and extent of partition `index` when `len` units are split into `parts`.
///
/// Lower indices absorb the remainder.
pub fn split_axis(len: u64, parts: u32, index: u32) -> (u64, u64) {
    let parts = parts as u64;
    let index = index as u64;
    let base = len / parts;
    let rem = len % parts;
    let origin = base * index + index.min(rem);
    let extent = base + u64::from(index < rem);
    (origin, extent)
}

// ============================================================================
// PARTITION GEOMETRY
// ============================================================================

/// Static rectangles of one boundary direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandGeometry {
    pub direction: Direction,
    pub neighbour: CellCoordinate,
    /// Tile of our own rectangle exported to the neighbour
    pub mine: Rect,
    /// Strip of the neighbour's rectangle adjacent to ours
    pub out: Rect,
}

/// Ownership and band layout for one peer.
///
/// Computed once at setup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionGeometry {
    width: u64,
    height: u64,
    topology: Topology,
    cell: CellCoordinate,
    aoi: u64,
    own: Rect,
    interior: Rect,
    bands: Vec<BandGeometry>,
}

impl PartitionGeometry {
    /// Computes the geometry of `cell`.
    ///
    /// # Errors
    /// `SyncError::Configuration` when the topology is invalid, `cell` lies
    /// outside it, the field is narrower than the grid, or
    /// `aoi >= extent / 2` for the smallest partition along an axis that has
    /// bands (bands would swallow the interior).
    pub fn new(
        width: u64,
        height: u64,
        topology: Topology,
        cell: CellCoordinate,
        aoi: u64,
    ) -> Result<Self, SyncError> {
        topology.validate()?;
        if aoi == 0 {
            return Err(SyncError::configuration("aoi must be positive"));
        }
        if cell.row >= topology.rows || cell.col >= topology.columns {
            return Err(SyncError::configuration(format!(
                "cell {} outside {}x{} topology",
                cell, topology.rows, topology.columns
            )));
        }
        if width < topology.columns as u64 || height < topology.rows as u64 {
            return Err(SyncError::configuration(format!(
                "field {}x{} too small for {}x{} peers",
                width, height, topology.rows, topology.columns
            )));
        }

        let neighbours: Vec<(Direction, CellCoordinate)> = Direction::ALL
            .iter()
            .filter_map(|&d| topology.neighbour(cell, d).map(|n| (d, n)))
            .collect();
        let has = |d: Direction| neighbours.iter().any(|(nd, _)| *nd == d);

        // Smallest partition along an axis has extent len / parts
        if has(Direction::West) || has(Direction::East) {
            check_radius("width", width / topology.columns as u64, aoi)?;
        }
        if has(Direction::North) || has(Direction::South) {
            check_radius("height", height / topology.rows as u64, aoi)?;
        }

        let (ox, w) = split_axis(width, topology.columns, cell.col);
        let (oy, h) = split_axis(height, topology.rows, cell.row);
        let x = AxisSpan::new(ox, w, aoi, has(Direction::West), has(Direction::East));
        let y = AxisSpan::new(oy, h, aoi, has(Direction::North), has(Direction::South));

        let own = Rect::new(ox as f64, oy as f64, (ox + w) as f64, (oy + h) as f64);
        let (ix0, ix1) = x.mine(0);
        let (iy0, iy1) = y.mine(0);
        let interior = Rect::new(ix0, iy0, ix1, iy1);

        let bands = neighbours
            .into_iter()
            .map(|(direction, neighbour)| {
                let (dx, dy) = direction.offset();
                let (mx0, mx1) = x.mine(dx);
                let (my0, my1) = y.mine(dy);
                let (qx0, qx1) = x.out(dx);
                let (qy0, qy1) = y.out(dy);
                BandGeometry {
                    direction,
                    neighbour,
                    mine: Rect::new(mx0, my0, mx1, my1),
                    out: Rect::new(qx0, qy0, qx1, qy1),
                }
            })
            .collect();

        Ok(Self {
            width,
            height,
            topology,
            cell,
            aoi,
            own,
            interior,
            bands,
        })
    }

    /// Geometry for `cell` using the dimensions and topology of `config`.
    pub fn from_config(config: &FieldConfig, cell: CellCoordinate) -> Result<Self, SyncError> {
        Self::new(config.width, config.height, config.topology, cell, config.aoi)
    }

    pub fn cell(&self) -> CellCoordinate {
        self.cell
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn aoi(&self) -> u64 {
        self.aoi
    }

    pub fn field_size(&self) -> (u64, u64) {
        (self.width, self.height)
    }

    /// The owned rectangle.
    pub fn own(&self) -> Rect {
        self.own
    }

    /// `(x, y)` of the owned rectangle.
    pub fn own_origin(&self) -> (f64, f64) {
        (self.own.x0, self.own.y0)
    }

    /// `(w, h)` of the owned rectangle.
    pub fn own_extent(&self) -> (f64, f64) {
        (self.own.width(), self.own.height())
    }

    /// Owned rectangle minus every mine band.
    pub fn interior(&self) -> Rect {
        self.interior
    }

    /// Bands for every present direction, in priority order.
    pub fn bands(&self) -> &[BandGeometry] {
        &self.bands
    }

    pub fn band(&self, direction: Direction) -> Option<&BandGeometry> {
        self.bands.iter().find(|b| b.direction == direction)
    }

    /// Present neighbours in priority order.
    pub fn neighbours(&self) -> Vec<(Direction, CellCoordinate)> {
        self.bands.iter().map(|b| (b.direction, b.neighbour)).collect()
    }

    /// How many snapshots arrive per step.
    pub fn expected_neighbours(&self) -> usize {
        self.bands.len()
    }

    /// Wrap extent for toroidal fields.
    pub fn wrap(&self) -> Option<Wrap> {
        self.topology.toroidal.then(|| Wrap {
            width: self.width as f64,
            height: self.height as f64,
        })
    }

    /// Topic this peer publishes its `direction` snapshot on.
    pub fn publish_topic(&self, prefix: &str, direction: Direction) -> String {
        format!("{}{}{}", prefix, self.cell, direction.code())
    }

    /// Topic of the `direction` neighbour that carries snapshots addressed to us.
    pub fn subscription_topic(&self, prefix: &str, direction: Direction) -> Option<String> {
        self.band(direction)
            .map(|b| format!("{}{}{}", prefix, b.neighbour, direction.opposite().code()))
    }

    /// Folds a location back into the field on a toroidal topology.
    pub fn normalize(&self, location: Location) -> Location {
        if !self.topology.toroidal {
            return location;
        }
        Location::new(
            location.x.rem_euclid(self.width as f64),
            location.y.rem_euclid(self.height as f64),
        )
    }

    /// True if the location lies inside the global field (after folding).
    pub fn in_field(&self, location: Location) -> bool {
        let loc = self.normalize(location);
        loc.x >= 0.0 && loc.x < self.width as f64 && loc.y >= 0.0 && loc.y < self.height as f64
    }

    /// Uniform continuous location inside the interior.
    pub fn random_location<R: Rng + ?Sized>(&self, rng: &mut R) -> Location {
        let r = self.interior;
        Location::new(rng.gen_range(r.x0..r.x1), rng.gen_range(r.y0..r.y1))
    }

    /// Uniform integer cell inside the interior, for discrete grids.
    pub fn random_grid_location<R: Rng + ?Sized>(&self, rng: &mut R) -> Location {
        let r = self.interior;
        let x = rng.gen_range(r.x0 as u64..r.x1 as u64);
        let y = rng.gen_range(r.y0 as u64..r.y1 as u64);
        Location::new(x as f64, y as f64)
    }
}

fn check_radius(axis: &str, smallest: u64, aoi: u64) -> Result<(), SyncError> {
    if 2 * aoi >= smallest {
        return Err(SyncError::configuration(format!(
            "aoi {} must be less than half the smallest partition {} ({})",
            aoi, axis, smallest
        )));
    }
    Ok(())
}

/// One axis of the owned rectangle, with band presence on each side.
struct AxisSpan {
    origin: u64,
    extent: u64,
    aoi: u64,
    low: bool,
    high: bool,
}

impl AxisSpan {
    fn new(origin: u64, extent: u64, aoi: u64, low: bool, high: bool) -> Self {
        Self {
            origin,
            extent,
            aoi,
            low,
            high,
        }
    }

    /// Segment of the owned span for a mine tile (`0` = middle, interior).
    fn mine(&self, delta: i64) -> (f64, f64) {
        let (o, e, a) = (self.origin as f64, self.extent as f64, self.aoi as f64);
        match delta {
            d if d < 0 => (o, o + a),
            d if d > 0 => (o + e - a, o + e),
            _ => (
                if self.low { o + a } else { o },
                if self.high { o + e - a } else { o + e },
            ),
        }
    }

    /// Segment outside (or along) the owned span for an out band.
    fn out(&self, delta: i64) -> (f64, f64) {
        let (o, e, a) = (self.origin as f64, self.extent as f64, self.aoi as f64);
        match delta {
            d if d < 0 => (o - a, o),
            d if d > 0 => (o + e, o + e + a),
            _ => (o, o + e),
        }
    }
}
