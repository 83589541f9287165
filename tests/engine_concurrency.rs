//! End-to-end tests of the worker lifecycle: spawning, publication,
//! replanning handoff and cooperative cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use grid_replan::{
    spawn, spawn_with, Agent, CostSurface, EngineConfig, EngineError, Path, PathUpdate,
    PlannerKind, ReplanOutcome, Subscription,
};
use grid_util::point::Point;

const DEADLINE: Duration = Duration::from_secs(5);

fn wait_for_path(subscription: &Subscription) -> Path {
    let start = Instant::now();
    loop {
        match subscription.take_path() {
            Some(PathUpdate::Found(path)) => return path,
            Some(PathUpdate::NoPath) => panic!("unexpected no-path result"),
            None => {}
        }
        assert!(start.elapsed() < DEADLINE, "no path published in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn wait_until_done(subscription: &Subscription) {
    let start = Instant::now();
    while !subscription.is_done() {
        assert!(start.elapsed() < DEADLINE, "worker did not finish in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn uniform_agent(side: usize, goal: Point) -> Arc<Agent> {
    Arc::new(Agent::with_endpoints(
        CostSurface::uniform(side, side, 160),
        Point::new(0, 0),
        goal,
    ))
}

#[test]
fn dlite_worker_replans_in_place() {
    let agent = uniform_agent(8, Point::new(7, 7));
    let config = EngineConfig::default();
    let (handle, subscription) = spawn(PlannerKind::DLite, &agent, &config).unwrap();

    let first = wait_for_path(&subscription);
    assert_eq!(first.cells[0], Point::new(0, 0));
    assert_eq!(*first.cells.last().unwrap(), Point::new(7, 7));
    assert!(!subscription.drain_expanded().is_empty());

    // The agent takes one step, then the world changes under the old plan.
    agent.advance(first.cells[1]);
    let blocked = first.cells[4];
    let delta = agent.paint(blocked, 0);

    let handle = match handle.replan(&[delta], &config).unwrap() {
        ReplanOutcome::Resumed(handle) => handle,
        ReplanOutcome::Restarted(..) => panic!("incremental planner should resume in place"),
    };

    let rerouted = wait_for_path(&subscription);
    assert_eq!(rerouted.cells[0], first.cells[1]);
    assert!(!rerouted.cells.contains(&blocked));
    assert_eq!(*rerouted.cells.last().unwrap(), Point::new(7, 7));

    handle.cancel();
    drop(handle);
}

#[test]
fn one_shot_planner_restarts_on_replan() {
    let agent = uniform_agent(6, Point::new(5, 5));
    let config = EngineConfig::default();
    let (handle, subscription) = spawn(PlannerKind::AStar, &agent, &config).unwrap();

    let first = wait_for_path(&subscription);
    wait_until_done(&subscription);

    agent.advance(first.cells[1]);
    let delta = agent.paint(first.cells[3], 0);
    let (handle, subscription) = match handle.replan(&[delta], &config).unwrap() {
        ReplanOutcome::Restarted(handle, subscription) => (handle, subscription),
        ReplanOutcome::Resumed(_) => panic!("one-shot planner should restart"),
    };

    let rerouted = wait_for_path(&subscription);
    assert_eq!(rerouted.cells[0], first.cells[1]);
    assert!(!rerouted.cells.contains(&first.cells[3]));
    drop(handle);
}

#[test]
fn cancel_wakes_a_suspended_worker() {
    let agent = uniform_agent(8, Point::new(7, 7));
    let config = EngineConfig::default();
    let (mut handle, subscription) = spawn(PlannerKind::DLite, &agent, &config).unwrap();

    // Let it converge and suspend, then cancel.
    wait_for_path(&subscription);
    handle.cancel();

    let start = Instant::now();
    handle.join();
    assert!(start.elapsed() < DEADLINE);
    assert!(handle.is_finished());
}

#[test]
fn final_result_survives_an_undrained_channel() {
    let agent = uniform_agent(10, Point::new(9, 9));
    let config = EngineConfig {
        batch_size: 1,
        channel_capacity: 1,
        ..EngineConfig::default()
    };
    let (_handle, subscription) = spawn(PlannerKind::AStar, &agent, &config).unwrap();

    wait_until_done(&subscription);
    match subscription.take_path() {
        Some(PathUpdate::Found(path)) => {
            assert_eq!(path.cells.len(), 19);
            assert!((path.cost - 36.0).abs() < 1e-9);
        }
        other => panic!("expected a found path, got {:?}", other),
    }
}

#[test]
fn anytime_workers_finish_with_the_optimal_path() {
    for kind in [PlannerKind::Ara, PlannerKind::NaiveAnytime] {
        let agent = uniform_agent(6, Point::new(5, 5));
        let (_handle, subscription) = spawn(kind, &agent, &EngineConfig::default()).unwrap();
        wait_until_done(&subscription);
        match subscription.take_path() {
            Some(PathUpdate::Found(path)) => {
                assert!((path.cost - 20.0).abs() < 1e-9, "{} ended at {}", kind, path.cost)
            }
            other => panic!("{} ended with {:?}", kind, other),
        }
    }
}

#[test]
fn adstar_worker_converges_while_running() {
    let agent = uniform_agent(6, Point::new(5, 5));
    let (handle, subscription) = spawn(PlannerKind::AdStar, &agent, &EngineConfig::default()).unwrap();

    let start = Instant::now();
    let final_cost = loop {
        if let Some(PathUpdate::Found(path)) = subscription.take_path() {
            if (path.cost - 20.0).abs() < 1e-9 {
                break path.cost;
            }
        }
        assert!(start.elapsed() < DEADLINE, "never converged to the optimum");
        thread::sleep(Duration::from_millis(5));
    };
    assert!((final_cost - 20.0).abs() < 1e-9);
    drop(handle);
}

#[test]
fn completion_callback_fires_exactly_once() {
    let agent = uniform_agent(5, Point::new(4, 4));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_worker = calls.clone();
    let (mut handle, subscription) = spawn_with(
        PlannerKind::AStar,
        &agent,
        &EngineConfig::default(),
        move || {
            calls_in_worker.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();

    wait_until_done(&subscription);
    handle.join();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn spawn_rejects_unset_endpoints() {
    let agent = Arc::new(Agent::new(CostSurface::uniform(4, 4, 160)));
    match spawn(PlannerKind::DLite, &agent, &EngineConfig::default()) {
        Err(EngineError::EndpointsUnset) => {}
        other => panic!("expected an endpoints error, got {:?}", other.map(|_| ())),
    }
}
