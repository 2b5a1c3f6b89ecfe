//! Convergence tracking for the iterative BTE solvers.
//!
//! Each calculation of a sweep is checked separately against the same
//! threshold; all of them share one iteration budget.

use serde::{Deserialize, Serialize};

/// Stopping criteria.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    pub threshold: f64,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveStats {
    pub iterations: usize,
    /// Largest per-calculation change at the last iteration.
    pub final_change: f64,
    pub converged: bool,
}

impl SolveStats {
    /// Stats of a direct (non-iterative) solution.
    pub fn direct() -> Self {
        Self { iterations: 0, final_change: 0.0, converged: true }
    }
}

impl Convergence {
    pub fn new(threshold: f64, max_iterations: usize) -> Self {
        Self { threshold, max_iterations }
    }

    /// Indices of the calculations whose change is still above threshold.
    pub fn unconverged(&self, changes: &[f64]) -> Vec<usize> {
        changes
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c.is_nan() || c >= self.threshold)
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns (should_stop, stats) for the per-calculation `changes` at iteration `i`.
    ///
    /// Stops when every calculation converged or the budget is spent; the
    /// stats tell the two apart.
    pub fn check(&self, changes: &[f64], i: usize) -> (bool, SolveStats) {
        let converged = self.unconverged(changes).is_empty();
        let final_change = changes.iter().fold(0.0f64, |m, &c| m.max(c));
        (
            converged || i >= self.max_iterations,
            SolveStats { iterations: i, final_change, converged },
        )
    }
}
