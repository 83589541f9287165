//! The travelling agent: root, goal and current position guarded by an
//! explicit lock, plus the shared cost surface the planners read through.

use std::sync::{Mutex, RwLock};

use grid_util::point::Point;
use log::info;

use crate::surface::{CostDelta, CostSurface};

#[derive(Debug, Default)]
struct AgentState {
    root: Option<Point>,
    goal: Option<Point>,
    position: Option<Point>,
    traveled: Vec<Point>,
}

/// Shared agent state. Planners hold an `Arc<Agent>` and read the position
/// and cost surface through it; the travel process mutates the position via
/// [Agent::advance] under the same lock, so a planner can never observe a
/// half-applied travel step.
#[derive(Debug)]
pub struct Agent {
    surface: RwLock<CostSurface>,
    state: Mutex<AgentState>,
}

impl Agent {
    pub fn new(surface: CostSurface) -> Agent {
        Agent {
            surface: RwLock::new(surface),
            state: Mutex::new(AgentState::default()),
        }
    }

    /// Convenience constructor with both endpoints already set.
    pub fn with_endpoints(surface: CostSurface, root: Point, goal: Point) -> Agent {
        let agent = Agent::new(surface);
        agent.set_root(root);
        agent.set_goal(goal);
        agent
    }

    /// Sets the starting position. Also resets the current position and the
    /// traveled trail.
    pub fn set_root(&self, root: Point) {
        let mut state = self.state.lock().unwrap();
        state.root = Some(root);
        state.position = Some(root);
        state.traveled.clear();
    }

    pub fn set_goal(&self, goal: Point) {
        self.state.lock().unwrap().goal = Some(goal);
    }

    pub fn root(&self) -> Option<Point> {
        self.state.lock().unwrap().root
    }

    pub fn goal(&self) -> Option<Point> {
        self.state.lock().unwrap().goal
    }

    /// Current position on the way to the goal.
    pub fn position(&self) -> Option<Point> {
        self.state.lock().unwrap().position
    }

    /// One travel step: commits the move to `cell` and records the cell left
    /// behind in the traveled trail.
    pub fn advance(&self, cell: Point) {
        let mut state = self.state.lock().unwrap();
        if let Some(previous) = state.position.replace(cell) {
            state.traveled.push(previous);
        }
        if state.goal == Some(cell) {
            info!("agent arrived at goal {:?}", cell);
        }
    }

    pub fn traveled(&self) -> Vec<Point> {
        self.state.lock().unwrap().traveled.clone()
    }

    pub fn at_goal(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.goal.is_some() && state.position == state.goal
    }

    /// Travel cost of entering a cell, read through the surface lock.
    pub fn cost(&self, cell: Point) -> f64 {
        self.surface.read().unwrap().cost(cell)
    }

    pub fn surface_size(&self) -> (usize, usize) {
        let surface = self.surface.read().unwrap();
        (surface.width(), surface.height())
    }

    /// Paints one cell of the surface and returns the observed cost change,
    /// ready to hand to a running planner's replan entry point.
    pub fn paint(&self, cell: Point, sample: u8) -> CostDelta {
        self.surface.write().unwrap().paint(cell, sample)
    }

    /// Runs a closure against the current surface under the read lock.
    pub fn with_surface<T>(&self, f: impl FnOnce(&CostSurface) -> T) -> T {
        f(&self.surface.read().unwrap())
    }
}
