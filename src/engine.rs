//! Search engine framework: the worker thread a planner runs on, cooperative
//! cancellation, the replan signal that wakes a suspended lifelong planner,
//! and batched publication of intermediate results with a dedicated slot for
//! the latest path.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use grid_util::point::Point;
use itertools::Itertools;
use log::{debug, info};
use thiserror::Error;

use crate::agent::Agent;
use crate::planner::{create_planner, PlannerKind};
use crate::surface::CostDelta;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("agent root and goal must be set before starting a search")]
    EndpointsUnset,
    #[error("failed to spawn planner worker: {0}")]
    Spawn(#[from] io::Error),
}

/// Tuning knobs for the engine and the anytime planners.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Starting inflation factor for the anytime planners.
    pub initial_epsilon: f64,
    /// Amount epsilon shrinks by per anytime iteration.
    pub epsilon_step: f64,
    /// Number of expanded cells buffered before a batch is published.
    pub batch_size: usize,
    /// Capacity of the expanded-cell batch channel.
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            initial_epsilon: 4.0,
            epsilon_step: 0.5,
            batch_size: 64,
            channel_capacity: 16,
        }
    }
}

/// A complete plan from the agent's position to the goal. Stale the moment
/// the cost surface or the position changes; consumers must not retain it
/// across a replan.
#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    /// Cells ordered current-position first, goal last. Never empty.
    pub cells: Vec<Point>,
    /// Sum of entering costs of every cell after the first.
    pub cost: f64,
}

/// Latest path result published by a worker.
#[derive(Clone, Debug, PartialEq)]
pub enum PathUpdate {
    Found(Path),
    NoPath,
}

/// Cooperative cancellation flag, sampled at loop iterations and suspension
/// points. Setting it never forcibly terminates the worker.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What woke a suspended worker.
#[derive(Debug)]
pub enum Wake {
    Deltas(Vec<CostDelta>),
    Cancelled,
}

/// Mailbox of pending cost deltas plus the condition variable a lifelong
/// planner suspends on once it has no useful work left. The worker drains
/// deltas only between expansion passes, so delta application is mutually
/// exclusive with the search loop's own node mutation by construction.
#[derive(Debug)]
pub struct ReplanSignal {
    deltas: Mutex<VecDeque<CostDelta>>,
    cond: Condvar,
    cancel: CancelToken,
}

impl ReplanSignal {
    pub fn new(cancel: CancelToken) -> ReplanSignal {
        ReplanSignal {
            deltas: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            cancel,
        }
    }

    /// Queues observed cost changes and wakes a waiting worker.
    pub fn push(&self, deltas: &[CostDelta]) {
        let mut queue = self.deltas.lock().unwrap();
        queue.extend(deltas.iter().copied());
        self.cond.notify_all();
    }

    /// Wakes a waiting worker without queueing anything. Used by the
    /// cancellation path so a suspended worker exits instead of blocking
    /// indefinitely. The queue lock is held across the broadcast: a waiter
    /// that has checked its conditions but not yet blocked on the condvar
    /// still holds the lock, so the notification cannot slip in between and
    /// be missed.
    pub fn notify(&self) {
        let _queue = self.deltas.lock().unwrap();
        self.cond.notify_all();
    }

    /// Takes whatever deltas are pending without blocking.
    pub fn drain(&self) -> Vec<CostDelta> {
        self.deltas.lock().unwrap().drain(..).collect()
    }

    /// Blocks until deltas arrive or the search is cancelled. The loop
    /// re-checks its condition on every wake, so spurious wakes are harmless.
    pub fn wait(&self) -> Wake {
        let mut queue = self.deltas.lock().unwrap();
        loop {
            if self.cancel.is_cancelled() {
                return Wake::Cancelled;
            }
            if !queue.is_empty() {
                return Wake::Deltas(queue.drain(..).collect());
            }
            queue = self.cond.wait(queue).unwrap();
        }
    }
}

/// Worker-side publication endpoint. Expanded cells are batched and sent
/// best-effort over a bounded channel (a slow consumer drops batches); the
/// latest path result goes into a dedicated slot that is never dropped.
#[derive(Debug)]
pub struct Publisher {
    batch: Vec<Point>,
    batch_size: usize,
    batch_tx: SyncSender<Vec<Point>>,
    path_slot: Arc<Mutex<Option<PathUpdate>>>,
    done: Arc<AtomicBool>,
    dropped_batches: u64,
}

impl Publisher {
    fn expanded(&mut self, cell: Point) {
        self.batch.push(cell);
        if self.batch.len() >= self.batch_size {
            self.flush();
        }
    }

    /// Sends the pending batch if any. Never blocks: when the consumer is
    /// behind, the batch is dropped and only counted.
    pub fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        match self.batch_tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_batches += 1;
                debug!("expansion consumer behind; dropped batch #{}", self.dropped_batches);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn publish(&mut self, update: PathUpdate) {
        self.flush();
        *self.path_slot.lock().unwrap() = Some(update);
    }

    fn mark_done(&mut self) {
        self.flush();
        self.done.store(true, Ordering::Release);
    }
}

/// Consumer-side endpoint handed out by [spawn].
#[derive(Debug)]
pub struct Subscription {
    expanded: Receiver<Vec<Point>>,
    path_slot: Arc<Mutex<Option<PathUpdate>>>,
    done: Arc<AtomicBool>,
}

impl Subscription {
    /// Drains every expanded-cell batch currently queued. Batch order is not
    /// guaranteed stable across publications.
    pub fn drain_expanded(&self) -> Vec<Point> {
        let mut cells = Vec::new();
        while let Ok(batch) = self.expanded.try_recv() {
            cells.extend(batch);
        }
        cells
    }

    /// Takes the latest path result, if a new one has been published since
    /// the last call.
    pub fn take_path(&self) -> Option<PathUpdate> {
        self.path_slot.lock().unwrap().take()
    }

    /// True once the worker loop has exited and flushed its final results.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Builds a connected publisher/subscription pair.
pub fn publication_channel(config: &EngineConfig) -> (Publisher, Subscription) {
    let (batch_tx, batch_rx) = sync_channel(config.channel_capacity.max(1));
    let path_slot = Arc::new(Mutex::new(None));
    let done = Arc::new(AtomicBool::new(false));
    let publisher = Publisher {
        batch: Vec::with_capacity(config.batch_size),
        batch_size: config.batch_size.max(1),
        batch_tx,
        path_slot: path_slot.clone(),
        done: done.clone(),
        dropped_batches: 0,
    };
    let subscription = Subscription {
        expanded: batch_rx,
        path_slot,
        done,
    };
    (publisher, subscription)
}

/// Everything a planner needs while running: the agent it serves, the
/// cancellation token, the replan signal and the publication endpoint.
pub struct SearchCtx {
    agent: Arc<Agent>,
    cancel: CancelToken,
    signal: Arc<ReplanSignal>,
    publisher: Publisher,
}

impl SearchCtx {
    pub fn new(
        agent: Arc<Agent>,
        cancel: CancelToken,
        signal: Arc<ReplanSignal>,
        publisher: Publisher,
    ) -> SearchCtx {
        SearchCtx {
            agent,
            cancel,
            signal,
            publisher,
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Agent's current position, read under its lock.
    pub fn position(&self) -> Point {
        self.agent
            .position()
            .expect("worker running with endpoints unset")
    }

    /// Cost of entering a cell on the current surface.
    pub fn cost(&self, cell: Point) -> f64 {
        self.agent.cost(cell)
    }

    /// Records one expanded cell into the visualization feed.
    pub fn expanded(&mut self, cell: Point) {
        self.publisher.expanded(cell);
    }

    /// Total entering cost of a cell sequence, excluding the first cell.
    pub fn path_cost(&self, cells: &[Point]) -> f64 {
        cells
            .iter()
            .tuple_windows()
            .map(|(_, next)| self.cost(*next))
            .sum()
    }

    pub fn publish_path(&mut self, cells: Vec<Point>) {
        let cost = self.path_cost(&cells);
        info!("path found: {} cells, cost {:.2}", cells.len(), cost);
        self.publisher.publish(PathUpdate::Found(Path { cells, cost }));
    }

    pub fn publish_no_path(&mut self) {
        info!("no path to goal");
        self.publisher.publish(PathUpdate::NoPath);
    }

    /// Takes pending cost deltas without suspending.
    pub fn drain_deltas(&self) -> Vec<CostDelta> {
        self.signal.drain()
    }

    /// Suspends until the environment changes or the search is cancelled.
    pub fn wait_for_change(&self) -> Wake {
        self.signal.wait()
    }

    pub fn flush(&mut self) {
        self.publisher.flush();
    }

    fn finish(&mut self) {
        self.publisher.mark_done();
    }
}

/// Outcome of handing cost deltas to a running planner.
pub enum ReplanOutcome {
    /// The planner incorporated the changes in place; keep using the same
    /// handle and subscription.
    Resumed(PlannerHandle),
    /// A fresh planner was started from the agent's current position.
    Restarted(PlannerHandle, Subscription),
}

/// Handle to one worker thread running one planner instance. At most one
/// worker ever runs per handle.
pub struct PlannerHandle {
    kind: PlannerKind,
    agent: Arc<Agent>,
    cancel: CancelToken,
    signal: Arc<ReplanSignal>,
    worker: Option<JoinHandle<()>>,
}

impl PlannerHandle {
    pub fn kind(&self) -> PlannerKind {
        self.kind
    }

    /// Requests cooperative cancellation and wakes the worker if it is
    /// suspended. The worker exits at its next check point.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.signal.notify();
    }

    /// True once the worker loop has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Blocks until the worker exits.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Hands observed cost changes to the planner. Incremental kinds absorb
    /// them in place and are woken if suspended; one-shot kinds (and workers
    /// that already exited) are cancelled and replaced by a fresh planner
    /// rooted at the agent's current position.
    pub fn replan(
        mut self,
        deltas: &[CostDelta],
        config: &EngineConfig,
    ) -> Result<ReplanOutcome, EngineError> {
        if self.kind.is_incremental() && !self.is_finished() {
            debug!("queueing {} cost deltas for {}", deltas.len(), self.kind);
            self.signal.push(deltas);
            Ok(ReplanOutcome::Resumed(self))
        } else {
            info!("restarting {} from the agent's current position", self.kind);
            self.cancel();
            self.join();
            let (handle, subscription) = spawn(self.kind, &self.agent, config)?;
            Ok(ReplanOutcome::Restarted(handle, subscription))
        }
    }
}

impl Drop for PlannerHandle {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

/// Starts the requested planner on a dedicated worker thread.
pub fn spawn(
    kind: PlannerKind,
    agent: &Arc<Agent>,
    config: &EngineConfig,
) -> Result<(PlannerHandle, Subscription), EngineError> {
    spawn_with(kind, agent, config, || {})
}

/// Like [spawn], with a completion callback invoked exactly once when the
/// worker loop exits, whatever the cause (goal reached, no path, cancelled).
pub fn spawn_with<F>(
    kind: PlannerKind,
    agent: &Arc<Agent>,
    config: &EngineConfig,
    on_done: F,
) -> Result<(PlannerHandle, Subscription), EngineError>
where
    F: FnOnce() + Send + 'static,
{
    let (root, goal) = match (agent.position(), agent.goal()) {
        (Some(root), Some(goal)) => (root, goal),
        _ => return Err(EngineError::EndpointsUnset),
    };
    let (width, height) = agent.surface_size();
    let mut planner = create_planner(kind, root, goal, width, height, config);

    let cancel = CancelToken::new();
    let signal = Arc::new(ReplanSignal::new(cancel.clone()));
    let (publisher, subscription) = publication_channel(config);
    let mut ctx = SearchCtx::new(agent.clone(), cancel.clone(), signal.clone(), publisher);

    let worker = thread::Builder::new()
        .name(format!("planner-{kind}"))
        .spawn(move || {
            info!("{} worker started: root {:?}, goal {:?}", planner.name(), root, goal);
            planner.run(&mut ctx);
            ctx.finish();
            on_done();
            info!("{} worker finished", planner.name());
        })?;

    Ok((
        PlannerHandle {
            kind,
            agent: agent.clone(),
            cancel,
            signal,
            worker: Some(worker),
        },
        subscription,
    ))
}

/// Builds a standalone context for driving a planner directly in unit tests.
#[cfg(test)]
pub fn test_ctx(agent: Arc<Agent>) -> (SearchCtx, Subscription) {
    let cancel = CancelToken::new();
    let signal = Arc::new(ReplanSignal::new(cancel.clone()));
    let (publisher, subscription) = publication_channel(&EngineConfig::default());
    (
        SearchCtx::new(agent, cancel, signal, publisher),
        subscription,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::CostSurface;

    #[test]
    fn final_path_survives_dropped_batches() {
        let config = EngineConfig {
            batch_size: 1,
            channel_capacity: 1,
            ..EngineConfig::default()
        };
        let (mut publisher, subscription) = publication_channel(&config);
        // Nobody drains: every flush past the first is dropped.
        for i in 0..10 {
            publisher.expanded(Point::new(i, 0));
        }
        assert!(publisher.dropped_batches > 0);

        *publisher.path_slot.lock().unwrap() = Some(PathUpdate::NoPath);
        publisher.mark_done();
        assert!(subscription.is_done());
        assert_eq!(subscription.take_path(), Some(PathUpdate::NoPath));
        assert_eq!(subscription.take_path(), None);
    }

    #[test]
    fn signal_drains_in_arrival_order() {
        let signal = ReplanSignal::new(CancelToken::new());
        let d1 = CostDelta {
            cell: Point::new(1, 1),
            delta: 2.0,
        };
        let d2 = CostDelta {
            cell: Point::new(2, 2),
            delta: -1.0,
        };
        signal.push(&[d1]);
        signal.push(&[d2]);
        assert_eq!(signal.drain(), vec![d1, d2]);
        assert!(signal.drain().is_empty());
    }

    #[test]
    fn cancelled_wait_returns_immediately() {
        let cancel = CancelToken::new();
        let signal = ReplanSignal::new(cancel.clone());
        cancel.cancel();
        assert!(matches!(signal.wait(), Wake::Cancelled));
    }

    #[test]
    fn cancel_wakes_a_waiter_at_any_interleaving() {
        // The waiter may be anywhere between its condition checks and the
        // condvar block when the cancellation lands; it must wake either way.
        for _ in 0..200 {
            let cancel = CancelToken::new();
            let signal = Arc::new(ReplanSignal::new(cancel.clone()));
            let waiter = {
                let signal = signal.clone();
                thread::spawn(move || signal.wait())
            };
            thread::sleep(std::time::Duration::from_micros(50));
            cancel.cancel();
            signal.notify();
            let wake = waiter.join().unwrap();
            assert!(matches!(wake, Wake::Cancelled));
        }
    }

    #[test]
    fn spawn_requires_endpoints() {
        let agent = Arc::new(Agent::new(CostSurface::uniform(4, 4, 255)));
        let result = spawn(PlannerKind::AStar, &agent, &EngineConfig::default());
        assert!(matches!(result, Err(EngineError::EndpointsUnset)));
    }
}
