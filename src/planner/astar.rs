//! One-shot A* on the weighted grid. Optimal, but every environment change
//! throws the whole search away; the engine restarts it from the agent's
//! current position.

use grid_util::point::Point;

use crate::engine::SearchCtx;
use crate::node::{Membership, Node, NodeMap, OpenSet};
use crate::planner::{manhattan, reconstruct, Planner, PlannerKind};
use crate::surface::neighbors4;

pub struct AStarPlanner {
    root: Point,
    goal: Point,
    width: usize,
    height: usize,
    nodes: NodeMap,
    open: OpenSet,
    pub expansions: u64,
}

impl AStarPlanner {
    pub fn new(root: Point, goal: Point, width: usize, height: usize) -> AStarPlanner {
        AStarPlanner {
            root,
            goal,
            width,
            height,
            nodes: NodeMap::default(),
            open: OpenSet::new(),
            expansions: 0,
        }
    }

    /// Runs the search to the goal. Returns the path root-first, or `None`
    /// when the frontier empties out or the search is cancelled.
    pub fn search(&mut self, ctx: &mut SearchCtx) -> Option<Vec<Point>> {
        self.nodes.clear();
        self.open.clear();

        let mut start = Node::new(self.root, 0.0, manhattan(self.root, self.goal));
        start.membership = Membership::Open;
        self.open.insert(self.root, start.astar_key());
        self.nodes.insert(self.root, start);

        while let Some((cell, _)) = self.open.pop() {
            if ctx.cancelled() {
                return None;
            }
            let g = match self.nodes.get_mut(&cell) {
                Some(node) => {
                    node.membership = Membership::Closed;
                    node.g
                }
                None => continue,
            };
            self.expansions += 1;
            ctx.expanded(cell);

            if cell == self.goal {
                let mut cells = reconstruct(&self.nodes, self.goal);
                cells.reverse();
                return Some(cells);
            }

            for neighbor in neighbors4(cell, self.width, self.height) {
                let tentative = g + ctx.cost(neighbor);
                let h = manhattan(neighbor, self.goal);
                let node = self
                    .nodes
                    .entry(neighbor)
                    .or_insert_with(|| Node::unreached(neighbor, h));
                // A strictly better route reopens even a closed neighbour.
                if tentative >= node.g {
                    continue;
                }
                node.g = tentative;
                node.prev = Some(cell);
                node.membership = Membership::Open;
                let key = node.astar_key();
                self.open.insert(neighbor, key);
            }
        }
        None
    }
}

impl Planner for AStarPlanner {
    fn name(&self) -> &'static str {
        "A*"
    }

    fn kind(&self) -> PlannerKind {
        PlannerKind::AStar
    }

    fn run(&mut self, ctx: &mut SearchCtx) {
        self.root = ctx.position();
        match self.search(ctx) {
            Some(cells) => ctx.publish_path(cells),
            None if ctx.cancelled() => {}
            None => ctx.publish_no_path(),
        }
    }
}
