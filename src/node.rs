//! Per-cell search node record shared by every planner, the key variants the
//! algorithms order their frontiers by, and the [OpenSet] frontier queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use fxhash::{FxBuildHasher, FxHashMap};
use grid_util::point::Point;
use indexmap::IndexMap;

use crate::{GRID_KEY_STRIDE, UNREACHED};

/// Node arena keyed by cell. Iteration order is insertion order, which keeps
/// frontier rebuilds and tests deterministic.
pub type NodeMap = IndexMap<Point, Node, FxBuildHasher>;

/// Deterministic single-integer index of a cell. Unique for grids narrower
/// than [GRID_KEY_STRIDE]; used as the final priority tie-break.
pub fn cell_index(cell: Point) -> i64 {
    cell.x as i64 * GRID_KEY_STRIDE + cell.y as i64
}

/// Which set a node currently belongs to. A node is `Open` iff it is resident
/// in the frontier queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    NotVisited,
    Visited,
    Open,
    Closed,
    /// Locally inconsistent but deferred to the next anytime iteration
    /// instead of being queued (AD* / ARA* bookkeeping).
    Inconsistent,
}

/// 2-part priority key, compared lexicographically with a total order over
/// floats.
#[derive(Clone, Copy, Debug)]
pub struct Key {
    pub k1: f64,
    pub k2: f64,
}

impl Key {
    pub fn new(k1: f64, k2: f64) -> Key {
        Key { k1, k2 }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.k1
            .total_cmp(&other.k1)
            .then_with(|| self.k2.total_cmp(&other.k2))
    }
}

/// A single search node. One struct serves every algorithm kind: the key
/// variants below read the fields they care about on demand, so a key can
/// never go stale relative to its inputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node {
    pub cell: Point,
    /// Accumulated cost along the best committed path.
    pub g: f64,
    /// Heuristic estimate towards the other search endpoint.
    pub h: f64,
    /// One-step lookahead estimate of `g`, maintained by the D*-Lite family.
    pub rhs: f64,
    /// Back-reference used solely for path reconstruction. An index into the
    /// [NodeMap], never an owning link.
    pub prev: Option<Point>,
    pub membership: Membership,
}

impl Node {
    pub fn new(cell: Point, g: f64, h: f64) -> Node {
        Node {
            cell,
            g,
            h,
            rhs: UNREACHED,
            prev: None,
            membership: Membership::NotVisited,
        }
    }

    /// A node with no committed cost yet.
    pub fn unreached(cell: Point, h: f64) -> Node {
        Node::new(cell, UNREACHED, h)
    }

    /// Plain A* key: `(g + h, g)`.
    pub fn astar_key(&self) -> Key {
        Key::new(self.g + self.h, self.g)
    }

    /// Epsilon-inflated key: `(g + e*h, g)`.
    pub fn eps_key(&self, epsilon: f64) -> Key {
        Key::new(self.g + epsilon * self.h, self.g)
    }

    /// D* Lite key: `(min(g, rhs) + h, min(g, rhs))`.
    pub fn dlite_key(&self) -> Key {
        let m = self.g.min(self.rhs);
        Key::new(m + self.h, m)
    }

    /// AD* key: inflated by epsilon while the node is over-consistent.
    pub fn adstar_key(&self, epsilon: f64) -> Key {
        if self.g > self.rhs {
            Key::new(self.rhs + epsilon * self.h, self.rhs)
        } else {
            Key::new(self.g + self.h, self.g)
        }
    }

    /// A node is locally consistent iff `g == rhs`.
    pub fn is_consistent(&self) -> bool {
        self.g == self.rhs
    }

    pub fn is_closed(&self) -> bool {
        self.membership == Membership::Closed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct HeapEntry {
    key: Key,
    cell: Point,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Inverted so the std max-heap pops the smallest key first, with a
        // deterministic tie-break on the cell index.
        match other.key.cmp(&self.key) {
            Ordering::Equal => cell_index(other.cell).cmp(&cell_index(self.cell)),
            ordering => ordering,
        }
    }
}

/// Frontier priority queue. The key map is the authoritative open set: a cell
/// is open iff present there, exactly once. Re-keying pushes a fresh heap
/// entry; entries whose key no longer matches the map are discarded lazily on
/// pop and peek.
#[derive(Clone, Debug, Default)]
pub struct OpenSet {
    heap: BinaryHeap<HeapEntry>,
    keys: FxHashMap<Point, Key>,
}

impl OpenSet {
    pub fn new() -> OpenSet {
        OpenSet::default()
    }

    /// Inserts a cell, or re-keys it if already open.
    pub fn insert(&mut self, cell: Point, key: Key) {
        self.keys.insert(cell, key);
        self.heap.push(HeapEntry { key, cell });
    }

    /// Removes a cell from the open set. Its heap entries become stale and
    /// are skipped when reached.
    pub fn remove(&mut self, cell: Point) -> bool {
        self.keys.remove(&cell).is_some()
    }

    pub fn contains(&self, cell: Point) -> bool {
        self.keys.contains_key(&cell)
    }

    /// Pops the open cell with the smallest key.
    pub fn pop(&mut self) -> Option<(Point, Key)> {
        while let Some(entry) = self.heap.pop() {
            if self.keys.get(&entry.cell) == Some(&entry.key) {
                self.keys.remove(&entry.cell);
                return Some((entry.cell, entry.key));
            }
        }
        None
    }

    /// Smallest key currently open, pruning stale heap entries on the way.
    pub fn peek_key(&mut self) -> Option<Key> {
        while let Some(entry) = self.heap.peek() {
            if self.keys.get(&entry.cell) == Some(&entry.key) {
                return Some(entry.key);
            }
            self.heap.pop();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.keys.clear();
    }

    /// Cells currently open, in no particular order. Used for wholesale
    /// frontier rebuilds when the comparator's inputs change.
    pub fn cells(&self) -> Vec<Point> {
        self.keys.keys().copied().collect()
    }
}
