//! Read-only view of the environment: a grid of grayscale darkness samples
//! mapped to per-cell travel costs, plus the [CostDelta] unit that replanning
//! consumes when samples are painted over at runtime.

use grid_util::grid::{Grid, SimpleGrid};
use grid_util::point::Point;
use smallvec::SmallVec;

use crate::IMPASSABLE_COST;

/// A single observed cost change, produced by [CostSurface::paint] and fed to
/// a running planner through the replanning protocol.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostDelta {
    pub cell: Point,
    /// New cost minus old cost of entering the cell.
    pub delta: f64,
}

/// 2D sample grid mapping a cell to a travel cost. Darker samples cost more;
/// a sample of exactly zero is the impassable sentinel.
#[derive(Clone, Debug)]
pub struct CostSurface {
    samples: SimpleGrid<u8>,
}

impl CostSurface {
    /// Creates a surface with every cell set to the same darkness sample.
    pub fn uniform(width: usize, height: usize, sample: u8) -> CostSurface {
        CostSurface {
            samples: SimpleGrid::new(width, height, sample),
        }
    }

    pub fn from_samples(samples: SimpleGrid<u8>) -> CostSurface {
        CostSurface { samples }
    }

    pub fn width(&self) -> usize {
        self.samples.width
    }

    pub fn height(&self) -> usize {
        self.samples.height
    }

    pub fn in_bounds(&self, cell: Point) -> bool {
        cell.x >= 0
            && cell.y >= 0
            && (cell.x as usize) < self.samples.width
            && (cell.y as usize) < self.samples.height
    }

    /// Raw darkness sample of a cell. Panics if the cell is out of bounds;
    /// such a lookup is a contract violation, not a recoverable error.
    pub fn sample(&self, cell: Point) -> u8 {
        assert!(self.in_bounds(cell), "sample lookup out of bounds: {:?}", cell);
        self.samples.get(cell.x as usize, cell.y as usize)
    }

    /// Cost of travelling to a cell from an adjacent cell. The impassable
    /// sentinel maps to [IMPASSABLE_COST]; everything else is a monotone
    /// decreasing function of brightness with a floor of 1, matching the
    /// Manhattan heuristic's scale.
    pub fn cost(&self, cell: Point) -> f64 {
        let sample = self.sample(cell);
        if sample == 0 {
            IMPASSABLE_COST
        } else {
            (256.0 - sample as f64) / 96.0 + 1.0
        }
    }

    /// Overwrites the darkness sample of a cell and reports the resulting
    /// cost change.
    pub fn paint(&mut self, cell: Point, sample: u8) -> CostDelta {
        let old_cost = self.cost(cell);
        self.samples.set(cell.x as usize, cell.y as usize, sample);
        CostDelta {
            cell,
            delta: self.cost(cell) - old_cost,
        }
    }
}

/// 4-connected neighbours of a cell, clipped to the grid bounds. No
/// diagonals.
pub fn neighbors4(cell: Point, width: usize, height: usize) -> SmallVec<[Point; 4]> {
    let mut neighbors = SmallVec::new();
    if cell.x > 0 {
        neighbors.push(Point::new(cell.x - 1, cell.y));
    }
    if cell.y > 0 {
        neighbors.push(Point::new(cell.x, cell.y - 1));
    }
    if (cell.x as usize) < width - 1 {
        neighbors.push(Point::new(cell.x + 1, cell.y));
    }
    if (cell.y as usize) < height - 1 {
        neighbors.push(Point::new(cell.x, cell.y + 1));
    }
    neighbors
}
