//! Anytime D* (AD*): the incremental backward search of D* Lite combined
//! with an inflated heuristic that deflates step by step. Early iterations
//! produce a bounded-suboptimal path quickly; once epsilon reaches one the
//! plan is optimal and stays optimal across incremental repairs.

use grid_util::point::Point;
use log::debug;

use crate::engine::{EngineConfig, SearchCtx, Wake};
use crate::node::{Membership, Node, NodeMap, OpenSet};
use crate::planner::{manhattan, reconstruct, Planner, PlannerKind};
use crate::surface::{neighbors4, CostDelta};
use crate::UNREACHED;

#[derive(Clone)]
pub struct AdStarPlanner {
    root: Point,
    goal: Point,
    width: usize,
    height: usize,
    nodes: NodeMap,
    open: OpenSet,
    /// Cells that went inconsistent after being closed this iteration. They
    /// rejoin the frontier at the next deflation instead of being re-expanded
    /// immediately.
    inconsistent: Vec<Point>,
    pub epsilon: f64,
    epsilon_step: f64,
    pub expansions: u64,
}

impl AdStarPlanner {
    pub fn new(
        root: Point,
        goal: Point,
        width: usize,
        height: usize,
        config: &EngineConfig,
    ) -> AdStarPlanner {
        AdStarPlanner {
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

    fn ensure_node(&mut self, cell: Point) -> &mut Node {
        let root = self.root;
        self.nodes
            .entry(cell)
            .or_insert_with(|| Node::unreached(cell, manhattan(cell, root)))
    }

    pub fn initialize(&mut self) {
        self.nodes.clear();
        self.open.clear();
        self.inconsistent.clear();
        let mut goal = Node::new(self.goal, UNREACHED, manhattan(self.goal, self.root));
        goal.rhs = 0.0;
        goal.membership = Membership::Open;
        self.open.insert(self.goal, goal.adstar_key(self.epsilon));
        self.nodes.insert(self.goal, goal);
        self.ensure_node(self.root);
    }

    /// Queues an inconsistent cell, or defers it to the next iteration when
    /// it has already been closed under the current epsilon. At the tightest
    /// epsilon there is no next iteration, so closed cells requeue
    /// immediately and the machinery degenerates to plain D* Lite.
    fn queue_or_defer(&mut self, cell: Point) {
        let eps = self.epsilon;
        let (key, membership) = {
            let node = self.ensure_node(cell);
            (node.adstar_key(eps), node.membership)
        };
        match membership {
            Membership::Closed if eps > 1.0 => {
                self.ensure_node(cell).membership = Membership::Inconsistent;
                self.inconsistent.push(cell);
            }
            Membership::Inconsistent => {}
            _ => {
                self.ensure_node(cell).membership = Membership::Open;
                self.open.insert(cell, key);
            }
        }
    }

    /// Full re-evaluation of one cell from its neighbours, used on the
    /// repair path where a targeted relaxation is not enough.
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
        if self.ensure_node(cell).is_consistent() {
            if self.open.remove(cell) {
                self.ensure_node(cell).membership = Membership::Closed;
            }
        } else {
            self.queue_or_defer(cell);
        }
    }

    /// Expands until the root is no better served by any queued cell under
    /// the current epsilon. Returns `false` when cancelled.
    pub fn compute(&mut self, ctx: &mut SearchCtx) -> bool {
        loop {
            if ctx.cancelled() {
                return false;
            }
            let root = *self.ensure_node(self.root);
            let keep_going = match self.open.peek_key() {
                Some(key) => key < root.adstar_key(self.epsilon) || root.rhs < root.g,
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
                let g = node.rhs;
                {
                    let updated = self.ensure_node(cell);
                    updated.g = g;
                    updated.membership = Membership::Closed;
                }
                for neighbor in neighbors4(cell, self.width, self.height) {
                    if neighbor == self.goal {
                        continue;
                    }
                    let candidate = g + ctx.cost(neighbor);
                    let improved = {
                        let n = self.ensure_node(neighbor);
                        if candidate < n.rhs {
                            n.rhs = candidate;
                            n.prev = Some(cell);
                            true
                        } else {
                            false
                        }
                    };
                    if improved {
                        self.queue_or_defer(neighbor);
                    }
                }
            } else {
                {
                    let raised = self.ensure_node(cell);
                    raised.g = UNREACHED;
                    raised.membership = Membership::Visited;
                }
                self.update_state(ctx, cell);
                for neighbor in neighbors4(cell, self.width, self.height) {
                    let depends = self
                        .nodes
                        .get(&neighbor)
                        .is_some_and(|n| n.prev == Some(cell));
                    if depends {
                        self.update_state(ctx, neighbor);
                    }
                }
            }
        }
    }

    /// Lowers epsilon one step and folds the deferred inconsistent cells
    /// back into the frontier, re-keyed under the new inflation.
    pub fn deflate(&mut self) {
        self.epsilon = (self.epsilon - self.epsilon_step).max(1.0);
        debug!("deflating to epsilon {:.2}", self.epsilon);

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
            let (key, consistent) = {
                let node = self.ensure_node(cell);
                (node.adstar_key(eps), node.is_consistent())
            };
            if consistent {
                self.ensure_node(cell).membership = Membership::Visited;
            } else {
                self.ensure_node(cell).membership = Membership::Open;
                self.open.insert(cell, key);
            }
        }
    }

    pub fn set_root(&mut self, root: Point) {
        if root == self.root {
            return;
        }
        self.root = root;
        for node in self.nodes.values_mut() {
            node.h = manhattan(node.cell, root);
        }
        let eps = self.epsilon;
        for cell in self.open.cells() {
            let key = self.ensure_node(cell).adstar_key(eps);
            self.open.insert(cell, key);
        }
        self.ensure_node(root);
    }

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

    pub fn current_path(&self) -> Option<Vec<Point>> {
        let root = self.nodes.get(&self.root)?;
        if root.rhs >= UNREACHED {
            return None;
        }
        Some(reconstruct(&self.nodes, self.root))
    }
}

impl Planner for AdStarPlanner {
    fn name(&self) -> &'static str {
        "AD*"
    }

    fn kind(&self) -> PlannerKind {
        PlannerKind::AdStar
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
            if self.epsilon > 1.0 {
                self.deflate();
                continue;
            }
            match ctx.wait_for_change() {
                Wake::Cancelled => return,
                Wake::Deltas(deltas) => self.apply_deltas(ctx, &deltas),
            }
        }
    }
}
