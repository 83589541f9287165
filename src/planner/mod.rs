//! The planner algorithms and the trait the engine drives them through.

use std::fmt;

use fxhash::FxHashSet;
use grid_util::point::Point;
use log::warn;

use crate::engine::{EngineConfig, SearchCtx};
use crate::node::NodeMap;

pub mod adstar;
pub mod ara;
pub mod astar;
pub mod dlite;
pub mod naive;

pub use adstar::AdStarPlanner;
pub use ara::AraPlanner;
pub use astar::AStarPlanner;
pub use dlite::DLitePlanner;
pub use naive::NaiveAnytimePlanner;

/// The available planner algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlannerKind {
    AStar,
    DLite,
    AdStar,
    Ara,
    NaiveAnytime,
}

impl PlannerKind {
    pub const ALL: [PlannerKind; 5] = [
        PlannerKind::AStar,
        PlannerKind::DLite,
        PlannerKind::AdStar,
        PlannerKind::Ara,
        PlannerKind::NaiveAnytime,
    ];

    /// Incremental planners absorb cost deltas into their existing search
    /// state; the rest must be restarted on change.
    pub fn is_incremental(self) -> bool {
        matches!(self, PlannerKind::DLite | PlannerKind::AdStar)
    }
}

impl fmt::Display for PlannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlannerKind::AStar => "A*",
            PlannerKind::DLite => "D* Lite",
            PlannerKind::AdStar => "AD*",
            PlannerKind::Ara => "ARA*",
            PlannerKind::NaiveAnytime => "NAA*",
        };
        write!(f, "{name}")
    }
}

/// A search algorithm instance, driven to completion on a worker thread. The
/// planner owns its node state exclusively; the engine only talks to it
/// through the context passed to [Planner::run].
pub trait Planner: Send {
    fn name(&self) -> &'static str;
    fn kind(&self) -> PlannerKind;
    fn run(&mut self, ctx: &mut SearchCtx);
}

/// Instantiates a planner of the requested kind.
pub fn create_planner(
    kind: PlannerKind,
    root: Point,
    goal: Point,
    width: usize,
    height: usize,
    config: &EngineConfig,
) -> Box<dyn Planner> {
    match kind {
        PlannerKind::AStar => Box::new(AStarPlanner::new(root, goal, width, height)),
        PlannerKind::DLite => Box::new(DLitePlanner::new(root, goal, width, height)),
        PlannerKind::AdStar => Box::new(AdStarPlanner::new(root, goal, width, height, config)),
        PlannerKind::Ara => Box::new(AraPlanner::new(root, goal, width, height, config)),
        PlannerKind::NaiveAnytime => {
            Box::new(NaiveAnytimePlanner::new(root, goal, width, height, config))
        }
    }
}

/// Manhattan distance between two cells, in cost units (the minimum cost of
/// entering a cell is 1, so this never overestimates on a 4-connected grid).
pub fn manhattan(a: Point, b: Point) -> f64 {
    ((a.x - b.x).abs() + (a.y - b.y).abs()) as f64
}

/// Follows `prev` links out of `from` until they run out, yielding the chain
/// in traversal order (`from` first). A cycle in the links is an integrity
/// fault: the chain is truncated there and returned partial rather than
/// walked forever.
pub fn reconstruct(nodes: &NodeMap, from: Point) -> Vec<Point> {
    let mut chain = vec![from];
    let mut seen: FxHashSet<Point> = FxHashSet::default();
    seen.insert(from);
    let mut current = from;
    while let Some(prev) = nodes.get(&current).and_then(|node| node.prev) {
        if !seen.insert(prev) {
            warn!("cycle in back-links at {:?}; truncating path", prev);
            break;
        }
        chain.push(prev);
        current = prev;
    }
    chain
}
