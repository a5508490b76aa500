//! 8-connected A* over a [`TraversabilityGrid`], plus line-of-sight
//! shortcutting of the resulting cell chain.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::grid::{Cell, TraversabilityGrid};

const NEIGHBOURS: [(i32, i32, f32); 8] = [
    (1, 0, 1.0),
    (-1, 0, 1.0),
    (0, 1, 1.0),
    (0, -1, 1.0),
    (1, 1, std::f32::consts::SQRT_2),
    (1, -1, std::f32::consts::SQRT_2),
    (-1, 1, std::f32::consts::SQRT_2),
    (-1, -1, std::f32::consts::SQRT_2),
];

#[derive(Debug, Clone, Copy)]
struct Node {
    cell: Cell,
    g: f32,
    f: f32,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.cell == other.cell
    }
}

impl Eq for Node {}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; ties broken on the cell for determinism.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Why a search ended without reaching a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFailure {
    Exhausted,
    IterationLimit,
}

/// Search tree grown from one start cell.
#[derive(Debug, Default)]
pub struct SearchTree {
    came_from: HashMap<Cell, Cell>,
    closed: HashSet<Cell>,
    pub expanded: usize,
}

impl SearchTree {
    pub fn reached(&self, c: Cell) -> bool {
        self.closed.contains(&c)
    }

    /// Cells from the start to `goal`, inclusive.
    pub fn path_to(&self, goal: Cell) -> Vec<Cell> {
        let mut path = vec![goal];
        let mut current = goal;
        while let Some(&prev) = self.came_from.get(&current) {
            path.push(prev);
            current = prev;
        }
        path.reverse();
        path
    }
}

/// Best-first search from `start`.
///
/// Stops at the first expanded cell for which `is_goal` holds. With a zero
/// heuristic and a goal that never matches this is a bounded Dijkstra flood,
/// and the returned tree describes every reachable cell.
pub fn search(
    grid: &TraversabilityGrid,
    start: Cell,
    is_goal: impl Fn(Cell) -> bool,
    heuristic: impl Fn(Cell) -> f32,
    max_iterations: usize,
) -> (SearchTree, Result<Cell, SearchFailure>) {
    let mut tree = SearchTree::default();
    let mut g_scores: HashMap<Cell, f32> = HashMap::new();
    let mut open = BinaryHeap::new();
    open.push(Node { cell: start, g: 0.0, f: heuristic(start) });
    g_scores.insert(start, 0.0);

    while let Some(current) = open.pop() {
        if !tree.closed.insert(current.cell) {
            continue;
        }
        tree.expanded += 1;
        if is_goal(current.cell) {
            trace!(expanded = tree.expanded, "goal reached");
            return (tree, Ok(current.cell));
        }
        if tree.expanded >= max_iterations {
            debug!(expanded = tree.expanded, "search hit iteration limit");
            return (tree, Err(SearchFailure::IterationLimit));
        }

        // A start inside inflation may walk out through inflated cells, but
        // never through occupied ones and never back in.
        let escaping = !grid.is_traversable(current.cell);
        let open_to = |c: Cell| grid.is_traversable(c) || (escaping && grid.is_passable(c));

        for (dx, dy, cost) in NEIGHBOURS {
            let next = [current.cell[0] + dx, current.cell[1] + dy];
            if tree.closed.contains(&next) || !open_to(next) {
                continue;
            }
            // No squeezing diagonally between two blocked cells.
            if dx != 0
                && dy != 0
                && !(open_to([current.cell[0] + dx, current.cell[1]])
                    && open_to([current.cell[0], current.cell[1] + dy]))
            {
                continue;
            }
            let g = current.g + cost;
            if g < g_scores.get(&next).copied().unwrap_or(f32::INFINITY) {
                g_scores.insert(next, g);
                tree.came_from.insert(next, current.cell);
                open.push(Node { cell: next, g, f: g + heuristic(next) });
            }
        }
    }
    (tree, Err(SearchFailure::Exhausted))
}

/// Octile distance in cells.
pub fn octile(a: Cell, b: Cell) -> f32 {
    let dx = (a[0] - b[0]).abs() as f32;
    let dy = (a[1] - b[1]).abs() as f32;
    let (lo, hi) = (dx.min(dy), dx.max(dy));
    lo * std::f32::consts::SQRT_2 + (hi - lo)
}

/// Drop intermediate cells that the robot can skip in a straight line.
pub fn shortcut(grid: &TraversabilityGrid, path: &[Cell]) -> Vec<Cell> {
    if path.len() <= 2 {
        return path.to_vec();
    }
    let start = path[0];
    let mut kept = vec![start];
    let mut i = 0;
    while i < path.len() - 1 {
        let mut furthest = i + 1;
        for j in (i + 2)..path.len() {
            if grid.line_of_sight(grid.centre(path[i]), grid.centre(path[j]), start) {
                furthest = j;
            }
        }
        kept.push(path[furthest]);
        i = furthest;
    }
    kept
}
