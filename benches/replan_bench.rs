use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use grid_replan::agent::Agent;
use grid_replan::engine::{publication_channel, CancelToken, EngineConfig, ReplanSignal, SearchCtx};
use grid_replan::planner::{AStarPlanner, DLitePlanner};
use grid_replan::surface::CostSurface;
use grid_util::point::Point;

fn ctx_for(agent: &Arc<Agent>) -> SearchCtx {
    let cancel = CancelToken::new();
    let signal = Arc::new(ReplanSignal::new(cancel.clone()));
    let (publisher, _subscription) = publication_channel(&EngineConfig::default());
    SearchCtx::new(agent.clone(), cancel, signal, publisher)
}

/// Incremental repair after a single blocked cell versus throwing the search
/// away and running A* from scratch.
fn bench_replan(c: &mut Criterion) {
    let side = 64;
    let root = Point::new(0, 0);
    let goal = Point::new(63, 63);
    let agent = Arc::new(Agent::with_endpoints(
        CostSurface::uniform(side, side, 160),
        root,
        goal,
    ));

    let mut ctx = ctx_for(&agent);
    let mut converged = DLitePlanner::new(root, goal, side, side);
    converged.initialize();
    assert!(converged.compute(&mut ctx));
    let path = converged.current_path().unwrap();
    let blocked = path[path.len() / 2];
    let delta = agent.paint(blocked, 0);

    let mut group = c.benchmark_group("replan_after_single_block");
    group.bench_function("dlite_repair", |b| {
        b.iter_batched(
            || (converged.clone(), ctx_for(&agent)),
            |(mut planner, mut ctx)| {
                planner.apply_deltas(&ctx, &[delta]);
                assert!(planner.compute(&mut ctx));
                black_box(planner.current_path())
            },
            BatchSize::SmallInput,
        )
    });
    group.bench_function("astar_fresh", |b| {
        b.iter_batched(
            || (AStarPlanner::new(root, goal, side, side), ctx_for(&agent)),
            |(mut planner, mut ctx)| black_box(planner.search(&mut ctx)),
            BatchSize::SmallInput,
        )
    });
    group.finish();

    let mut group = c.benchmark_group("initial_solve");
    group.bench_function("dlite", |b| {
        b.iter_batched(
            || (DLitePlanner::new(root, goal, side, side), ctx_for(&agent)),
            |(mut planner, mut ctx)| {
                planner.initialize();
                assert!(planner.compute(&mut ctx));
                black_box(planner.current_path())
            },
            BatchSize::SmallInput,
        )
    });
    group.bench_function("astar", |b| {
        b.iter_batched(
            || (AStarPlanner::new(root, goal, side, side), ctx_for(&agent)),
            |(mut planner, mut ctx)| black_box(planner.search(&mut ctx)),
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_replan);
criterion_main!(benches);
