//! Naive anytime search: repeated weighted A* with a shrinking inflation
//! factor, each iteration searching from scratch. The baseline the smarter
//! anytime planners are measured against.

use grid_util::point::Point;
use log::debug;

use crate::engine::{EngineConfig, SearchCtx};
use crate::node::{Membership, Node, NodeMap, OpenSet};
use crate::planner::{manhattan, reconstruct, Planner, PlannerKind};
use crate::surface::neighbors4;

pub struct NaiveAnytimePlanner {
    root: Point,
    goal: Point,
    width: usize,
    height: usize,
    nodes: NodeMap,
    open: OpenSet,
    pub epsilon: f64,
    epsilon_step: f64,
    pub expansions: u64,
}

impl NaiveAnytimePlanner {
    pub fn new(
        root: Point,
        goal: Point,
        width: usize,
        height: usize,
        config: &EngineConfig,
    ) -> NaiveAnytimePlanner {
        NaiveAnytimePlanner {
            root,
            goal,
            width,
            height,
            nodes: NodeMap::default(),
            open: OpenSet::new(),
            epsilon: config.initial_epsilon.max(1.0),
            epsilon_step: config.epsilon_step,
            expansions: 0,
        }
    }

    /// One full weighted search from scratch, backwards from the goal so the
    /// result comes out root-first without a reversal.
    pub fn search_once(&mut self, ctx: &mut SearchCtx) -> Option<Vec<Point>> {
        self.nodes.clear();
        self.open.clear();

        let mut goal = Node::new(self.goal, 0.0, manhattan(self.goal, self.root));
        goal.membership = Membership::Open;
        self.open.insert(self.goal, goal.eps_key(self.epsilon));
        self.nodes.insert(self.goal, goal);

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

            if cell == self.root {
                return Some(reconstruct(&self.nodes, self.root));
            }

            let eps = self.epsilon;
            for neighbor in neighbors4(cell, self.width, self.height) {
                let tentative = g + ctx.cost(neighbor);
                let h = manhattan(neighbor, self.root);
                let node = self
                    .nodes
                    .entry(neighbor)
                    .or_insert_with(|| Node::unreached(neighbor, h));
                // The inflated heuristic is not consistent, so a strictly
                // better route may reopen a closed neighbour.
                if tentative >= node.g {
                    continue;
                }
                node.g = tentative;
                node.prev = Some(cell);
                node.membership = Membership::Open;
                let key = node.eps_key(eps);
                self.open.insert(neighbor, key);
            }
        }
        None
    }
}

impl Planner for NaiveAnytimePlanner {
    fn name(&self) -> &'static str {
        "NAA*"
    }

    fn kind(&self) -> PlannerKind {
        PlannerKind::NaiveAnytime
    }

    fn run(&mut self, ctx: &mut SearchCtx) {
        self.root = ctx.position();
        loop {
            if ctx.cancelled() {
                return;
            }
            debug!("fresh pass at epsilon {:.2}", self.epsilon);
            match self.search_once(ctx) {
                Some(cells) => ctx.publish_path(cells),
                None => {
                    if !ctx.cancelled() {
                        ctx.publish_no_path();
                    }
                    return;
                }
            }
            if self.epsilon <= 1.0 {
                return;
            }
            self.epsilon = (self.epsilon - self.epsilon_step).max(1.0);
        }
    }
}
