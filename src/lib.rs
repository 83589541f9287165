//! # grid_replan
//!
//! Lifelong pathfinding on weighted 2D grids. A mobile agent travels across a
//! grid whose per-cell travel cost is derived from a grayscale cost surface
//! (darker cells cost more), while the surface keeps changing underneath it.
//! The crate provides a one-shot optimal planner ([A*](planner::astar)),
//! incremental lifelong planners ([D* Lite](planner::dlite),
//! [AD*](planner::adstar)) and anytime epsilon-inflated variants
//! ([ARA*](planner::ara), [naive anytime](planner::naive)), all running on a
//! background worker so the agent can travel and the environment can mutate
//! concurrently.
//!
//! The [engine] module owns the worker lifecycle: cooperative cancellation,
//! batched publication of expanded cells, a dedicated slot for the latest
//! path result, and the replanning handoff that feeds cost deltas into a
//! running incremental planner (or restarts a one-shot one).

pub mod agent;
pub mod engine;
pub mod node;
pub mod planner;
pub mod surface;

pub use agent::Agent;
pub use engine::{
    spawn, spawn_with, EngineConfig, EngineError, Path, PathUpdate, PlannerHandle, ReplanOutcome,
    Subscription,
};
pub use planner::PlannerKind;
pub use surface::{CostDelta, CostSurface};

/// Stride used to fold cell coordinates into a single deterministic index
/// (`x * GRID_KEY_STRIDE + y`). Bounds the supported grid width.
pub const GRID_KEY_STRIDE: i64 = 10_000;

/// Cost assigned to cells whose darkness sample is the impassable sentinel
/// (exactly zero).
pub const IMPASSABLE_COST: f64 = 10_000.0;

/// Stand-in for an unknown cost-to-goal. Half of [f64::MAX] so that adding an
/// edge cost never overflows and keys built from it still order correctly.
pub const UNREACHED: f64 = f64::MAX / 2.0;
