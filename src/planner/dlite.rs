//! D* Lite: incremental lifelong search. The search runs backwards from the
//! goal, so `g` and `rhs` measure cost-to-goal and survive the agent moving;
//! cost changes are absorbed by re-evaluating only the affected cells and
//! their dependents instead of starting over.

use grid_util::point::Point;
use log::debug;

use crate::engine::{SearchCtx, Wake};
use crate::node::{Membership, Node, NodeMap, OpenSet};
use crate::planner::{manhattan, reconstruct, Planner, PlannerKind};
use crate::surface::{neighbors4, CostDelta};
use crate::UNREACHED;

#[derive(Clone)]
pub struct DLitePlanner {
    root: Point,
    goal: Point,
    width: usize,
    height: usize,
    nodes: NodeMap,
    open: OpenSet,
    pub expansions: u64,
}

impl DLitePlanner {
    pub fn new(root: Point, goal: Point, width: usize, height: usize) -> DLitePlanner {
        DLitePlanner {
            root,
            goal,
            width,
            height,
            nodes: NodeMap::default(),
            open: OpenSet::new(),
            expansions: 0,
        }
    }

    fn ensure_node(&mut self, cell: Point) -> &mut Node {
        let root = self.root;
        self.nodes
            .entry(cell)
            .or_insert_with(|| Node::unreached(cell, manhattan(cell, root)))
    }

    /// Seeds the search: the goal is the single inconsistent node.
    pub fn initialize(&mut self) {
        self.nodes.clear();
        self.open.clear();
        let mut goal = Node::new(self.goal, UNREACHED, manhattan(self.goal, self.root));
        goal.rhs = 0.0;
        goal.membership = Membership::Open;
        self.open.insert(self.goal, goal.dlite_key());
        self.nodes.insert(self.goal, goal);
        self.ensure_node(self.root);
    }

    /// Re-evaluates one cell: recomputes its one-step lookahead from its
    /// neighbours and queues it iff it came out locally inconsistent. The
    /// goal's lookahead is pinned at zero.
    fn update_state(&mut self, ctx: &SearchCtx, cell: Point) {
        if cell != self.goal {
            let enter = ctx.cost(cell);
            let mut best = UNREACHED;
            let mut best_prev = None;
            for neighbor in neighbors4(cell, self.width, self.height) {
                let g = self.nodes.get(&neighbor).map_or(UNREACHED, |n| n.g);
                if g >= UNREACHED {
                    continue;
                }
                let candidate = g + enter;
                if candidate < best {
                    best = candidate;
                    best_prev = Some(neighbor);
                }
            }
            let node = self.ensure_node(cell);
            node.rhs = best;
            node.prev = best_prev;
        }
        let (key, consistent) = {
            let node = self.ensure_node(cell);
            (node.dlite_key(), node.is_consistent())
        };
        if consistent {
            self.open.remove(cell);
            self.ensure_node(cell).membership = Membership::Closed;
        } else {
            self.open.insert(cell, key);
            self.ensure_node(cell).membership = Membership::Open;
        }
    }

    /// Expands inconsistent cells until the root's key is the smallest left
    /// and the root itself is consistent. Returns `false` when cancelled
    /// mid-expansion.
    pub fn compute(&mut self, ctx: &mut SearchCtx) -> bool {
        loop {
            if ctx.cancelled() {
                return false;
            }
            let root = *self.ensure_node(self.root);
            let keep_going = match self.open.peek_key() {
                Some(key) => key < root.dlite_key() || !root.is_consistent(),
                None => false,
            };
            if !keep_going {
                return true;
            }
            let Some((cell, _)) = self.open.pop() else {
                return true;
            };
            self.expansions += 1;
            ctx.expanded(cell);

            let node = *self.ensure_node(cell);
            if node.g > node.rhs {
                // Over-consistent: commit the better estimate and let the
                // neighbours pick it up.
                let updated = self.ensure_node(cell);
                updated.g = updated.rhs;
                updated.membership = Membership::Closed;
                for neighbor in neighbors4(cell, self.width, self.height) {
                    self.update_state(ctx, neighbor);
                }
            } else {
                // Under-consistent: the old estimate is no longer supported.
                // Retract it fully, then re-evaluate the cell and everything
                // around it.
                let raised = self.ensure_node(cell);
                raised.g = UNREACHED;
                raised.membership = Membership::Visited;
                self.update_state(ctx, cell);
                for neighbor in neighbors4(cell, self.width, self.height) {
                    self.update_state(ctx, neighbor);
                }
            }
        }
    }

    /// Moves the search root to the agent's new position. Cost-to-goal
    /// estimates stay valid; only the heuristic aim and the frontier order
    /// change.
    pub fn set_root(&mut self, root: Point) {
        if root == self.root {
            return;
        }
        debug!("re-rooting incremental search at {:?}", root);
        self.root = root;
        for node in self.nodes.values_mut() {
            node.h = manhattan(node.cell, root);
        }
        for cell in self.open.cells() {
            let key = self.ensure_node(cell).dlite_key();
            self.open.insert(cell, key);
        }
        self.ensure_node(root);
    }

    /// Feeds observed cost changes into the search state. Cells the search
    /// never reached are skipped; they will be costed correctly if and when
    /// an expansion first touches them.
    pub fn apply_deltas(&mut self, ctx: &SearchCtx, deltas: &[CostDelta]) {
        for delta in deltas {
            if !self.nodes.contains_key(&delta.cell) {
                debug!("cost change at {:?} outside the explored region", delta.cell);
                continue;
            }
            self.update_state(ctx, delta.cell);
            for neighbor in neighbors4(delta.cell, self.width, self.height) {
                if self.nodes.contains_key(&neighbor) {
                    self.update_state(ctx, neighbor);
                }
            }
        }
    }

    /// Current estimates of one cell, if the search has touched it.
    pub fn node(&self, cell: Point) -> Option<&Node> {
        self.nodes.get(&cell)
    }

    /// Every cell the search has touched so far, with its current estimates.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Extracts the path implied by the converged estimates, root-first.
    pub fn current_path(&self) -> Option<Vec<Point>> {
        let root = self.nodes.get(&self.root)?;
        if root.rhs >= UNREACHED {
            return None;
        }
        Some(reconstruct(&self.nodes, self.root))
    }
}

impl Planner for DLitePlanner {
    fn name(&self) -> &'static str {
        "D* Lite"
    }

    fn kind(&self) -> PlannerKind {
        PlannerKind::DLite
    }

    fn run(&mut self, ctx: &mut SearchCtx) {
        self.root = ctx.position();
        self.initialize();
        loop {
            if ctx.cancelled() {
                return;
            }
            let position = ctx.position();
            if position == self.goal {
                ctx.publish_path(vec![position]);
                return;
            }
            self.set_root(position);
            let pending = ctx.drain_deltas();
            if !pending.is_empty() {
                self.apply_deltas(ctx, &pending);
            }
            if !self.compute(ctx) {
                return;
            }
            match self.current_path() {
                Some(cells) => ctx.publish_path(cells),
                None => ctx.publish_no_path(),
            }
            match ctx.wait_for_change() {
                Wake::Cancelled => return,
                Wake::Deltas(deltas) => self.apply_deltas(ctx, &deltas),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::engine::test_ctx;
    use crate::surface::CostSurface;
    use std::sync::Arc;

    fn converged_5x5() -> (DLitePlanner, SearchCtx, Arc<Agent>) {
        let agent = Arc::new(Agent::with_endpoints(
            CostSurface::uniform(5, 5, 160),
            Point::new(0, 0),
            Point::new(4, 4),
        ));
        let (mut ctx, _sub) = test_ctx(agent.clone());
        let mut planner = DLitePlanner::new(Point::new(0, 0), Point::new(4, 4), 5, 5);
        planner.initialize();
        assert!(planner.compute(&mut ctx));
        (planner, ctx, agent)
    }

    #[test]
    fn converges_to_shortest_path() {
        let (planner, ctx, _agent) = converged_5x5();
        let cells = planner.current_path().unwrap();
        assert_eq!(cells.len(), 9);
        assert_eq!(cells[0], Point::new(0, 0));
        assert_eq!(cells[8], Point::new(4, 4));
        assert!((ctx.path_cost(&cells) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn recompute_without_changes_is_free() {
        let (mut planner, mut ctx, _agent) = converged_5x5();
        let path = planner.current_path().unwrap();
        let before = planner.expansions;
        planner.apply_deltas(&ctx, &[]);
        assert!(planner.compute(&mut ctx));
        assert_eq!(planner.expansions, before);
        assert_eq!(planner.current_path().unwrap(), path);
    }

    #[test]
    fn path_estimates_are_locally_consistent() {
        let (planner, _ctx, _agent) = converged_5x5();
        let cells = planner.current_path().unwrap();
        let mut last = f64::MAX;
        for cell in cells {
            let node = planner.nodes[&cell];
            assert!(node.is_consistent(), "inconsistent node at {:?}", cell);
            assert!(node.rhs < last, "cost-to-goal must drop along the path");
            last = node.rhs;
        }
    }

    #[test]
    fn every_settled_node_is_locally_consistent() {
        let (planner, _ctx, _agent) = converged_5x5();
        for node in planner.nodes.values() {
            if node.g < UNREACHED && node.cell != planner.root {
                assert!(
                    node.is_consistent(),
                    "settled node at {:?} has g {} but rhs {}",
                    node.cell,
                    node.g,
                    node.rhs
                );
            }
        }
    }

    #[test]
    fn repair_reroutes_around_a_blocked_cell() {
        let (mut planner, mut ctx, agent) = converged_5x5();
        let cells = planner.current_path().unwrap();
        let blocked = cells[4];

        let delta = agent.paint(blocked, 0);
        let before = planner.expansions;
        planner.apply_deltas(&ctx, &[delta]);
        assert!(planner.compute(&mut ctx));
        let repair_expansions = planner.expansions - before;

        let rerouted = planner.current_path().unwrap();
        assert!(!rerouted.contains(&blocked));
        assert_eq!(rerouted.len(), 9);
        assert!((ctx.path_cost(&rerouted) - 16.0).abs() < 1e-9);

        // The repair touches a fraction of what a fresh search would.
        let (mut fresh_ctx, _sub) = test_ctx(agent.clone());
        let mut fresh = DLitePlanner::new(Point::new(0, 0), Point::new(4, 4), 5, 5);
        fresh.initialize();
        assert!(fresh.compute(&mut fresh_ctx));
        assert!(repair_expansions < fresh.expansions);
    }

    #[test]
    fn moving_the_root_reuses_cost_to_goal_estimates() {
        let (mut planner, mut ctx, _agent) = converged_5x5();
        let cells = planner.current_path().unwrap();
        planner.set_root(cells[2]);
        assert!(planner.compute(&mut ctx));
        let remaining = planner.current_path().unwrap();
        assert_eq!(remaining[0], cells[2]);
        assert_eq!(remaining.len(), 7);
        assert!((ctx.path_cost(&remaining) - 12.0).abs() < 1e-9);
    }
}
