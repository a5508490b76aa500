//! [`RepeatGuard`] – detects an exploration loop that keeps choosing the
//! same goal.
//!
//! The guard keeps the last `threshold` goal labels; once they are all equal
//! the caller is considered stuck.
//!
//! ```rust
//! use reach_runtime::guard::RepeatGuard;
//!
//! let mut guard = RepeatGuard::new(3);
//! assert!(!guard.record("frontier 4,7"));
//! assert!(!guard.record("frontier 4,7"));
//! assert!(guard.record("frontier 4,7"));
//! guard.reset();
//! assert!(!guard.record("frontier 4,7"));
//! ```

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RepeatGuard {
    threshold: usize,
    recent: VecDeque<String>,
}

impl RepeatGuard {
    /// `threshold` is clamped to at least 2; a single goal is never a loop.
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(2);
        Self { threshold, recent: VecDeque::with_capacity(threshold) }
    }

    /// Record the goal just chosen; `true` when it completes a streak of
    /// `threshold` identical goals.
    pub fn record(&mut self, goal: impl Into<String>) -> bool {
        self.recent.push_back(goal.into());
        if self.recent.len() > self.threshold {
            self.recent.pop_front();
        }
        self.is_stuck()
    }

    pub fn is_stuck(&self) -> bool {
        self.recent.len() == self.threshold && self.recent.iter().all(|g| *g == self.recent[0])
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }
}

impl Default for RepeatGuard {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternating_goals_never_trip() {
        let mut guard = RepeatGuard::new(2);
        for i in 0..10 {
            assert!(!guard.record(if i % 2 == 0 { "a" } else { "b" }));
        }
    }

    #[test]
    fn streak_stays_stuck_until_broken() {
        let mut guard = RepeatGuard::new(3);
        guard.record("x");
        guard.record("x");
        assert!(guard.record("x"));
        assert!(guard.record("x"));
        assert!(!guard.record("y"));
    }

    #[test]
    fn threshold_below_two_is_raised() {
        let mut guard = RepeatGuard::new(1);
        assert!(!guard.record("only"));
        assert!(guard.record("only"));
    }
}
