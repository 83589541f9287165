//! ARA*: anytime repairing A*. Runs weighted A* forward from the root with a
//! shrinking inflation factor, carrying the previous iteration's estimates
//! over so each improvement pass only re-expands what the tighter bound
//! actually disturbs.

use grid_util::point::Point;
use log::debug;

use crate::engine::{EngineConfig, SearchCtx};
use crate::node::{Key, Membership, Node, NodeMap, OpenSet};
use crate::planner::{manhattan, reconstruct, Planner, PlannerKind};
use crate::surface::neighbors4;
use crate::UNREACHED;

pub struct AraPlanner {
    root: Point,
    goal: Point,
    width: usize,
    height: usize,
    nodes: NodeMap,
    open: OpenSet,
    /// Improved-after-close cells, deferred to the next improvement pass.
    inconsistent: Vec<Point>,
    pub epsilon: f64,
    epsilon_step: f64,
    pub expansions: u64,
}

impl AraPlanner {
    pub fn new(
        root: Point,
        goal: Point,
        width: usize,
        height: usize,
        config: &EngineConfig,
    ) -> AraPlanner {
        AraPlanner {
            root,
            goal,
            width,
            height,
            nodes: NodeMap::default(),
            open: OpenSet::new(),
            inconsistent: Vec::new(),
            epsilon: config.initial_epsilon.max(1.0),
            epsilon_step: config.epsilon_step,
            expansions: 0,
        }
    }

    pub fn initialize(&mut self) {
        self.nodes.clear();
        self.open.clear();
        self.inconsistent.clear();
        let mut start = Node::new(self.root, 0.0, manhattan(self.root, self.goal));
        start.membership = Membership::Open;
        self.open.insert(self.root, start.eps_key(self.epsilon));
        self.nodes.insert(self.root, start);
    }

    /// One improvement pass: expands until no queued cell can better the
    /// goal under the current epsilon. Returns `false` when cancelled.
    pub fn improve_path(&mut self, ctx: &mut SearchCtx) -> bool {
        loop {
            if ctx.cancelled() {
                return false;
            }
            let goal_g = self.nodes.get(&self.goal).map_or(UNREACHED, |n| n.g);
            let goal_key = Key::new(goal_g, goal_g);
            let keep_going = match self.open.peek_key() {
                Some(key) => key < goal_key,
                None => false,
            };
            if !keep_going {
                return true;
            }
            let Some((cell, _)) = self.open.pop() else {
                return true;
            };
            let g = match self.nodes.get_mut(&cell) {
                Some(node) => {
                    node.membership = Membership::Closed;
                    node.g
                }
                None => continue,
            };
            self.expansions += 1;
            ctx.expanded(cell);

            let eps = self.epsilon;
            for neighbor in neighbors4(cell, self.width, self.height) {
                let tentative = g + ctx.cost(neighbor);
                let h = manhattan(neighbor, self.goal);
                let node = self
                    .nodes
                    .entry(neighbor)
                    .or_insert_with(|| Node::unreached(neighbor, h));
                if tentative >= node.g {
                    continue;
                }
                node.g = tentative;
                node.prev = Some(cell);
                match node.membership {
                    Membership::Closed => {
                        node.membership = Membership::Inconsistent;
                        self.inconsistent.push(neighbor);
                    }
                    Membership::Inconsistent => {}
                    _ => {
                        node.membership = Membership::Open;
                        let key = node.eps_key(eps);
                        self.open.insert(neighbor, key);
                    }
                }
            }
        }
    }

    /// Prepares the next improvement pass: merges the deferred cells back
    /// into the frontier and re-keys everything under the new epsilon.
    pub fn rebuild_frontier(&mut self) {
        let mut frontier = self.open.cells();
        frontier.extend(self.inconsistent.drain(..));
        self.open.clear();
        for node in self.nodes.values_mut() {
            if node.is_closed() {
                node.membership = Membership::Visited;
            }
        }
        let eps = self.epsilon;
        for cell in frontier {
            if let Some(node) = self.nodes.get_mut(&cell) {
                node.membership = Membership::Open;
                let key = node.eps_key(eps);
                self.open.insert(cell, key);
            }
        }
    }

    pub fn current_path(&self) -> Option<Vec<Point>> {
        let goal = self.nodes.get(&self.goal)?;
        if goal.g >= UNREACHED {
            return None;
        }
        let mut cells = reconstruct(&self.nodes, self.goal);
        cells.reverse();
        Some(cells)
    }
}

impl Planner for AraPlanner {
    fn name(&self) -> &'static str {
        "ARA*"
    }

    fn kind(&self) -> PlannerKind {
        PlannerKind::Ara
    }

    fn run(&mut self, ctx: &mut SearchCtx) {
        self.root = ctx.position();
        self.initialize();
        loop {
            if !self.improve_path(ctx) {
                return;
            }
            match self.current_path() {
                Some(cells) => ctx.publish_path(cells),
                None => {
                    ctx.publish_no_path();
                    return;
                }
            }
            if self.epsilon <= 1.0 {
                return;
            }
            self.epsilon = (self.epsilon - self.epsilon_step).max(1.0);
            debug!("improving solution at epsilon {:.2}", self.epsilon);
            self.rebuild_frontier();
        }
    }
}
