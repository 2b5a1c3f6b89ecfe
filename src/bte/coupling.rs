//! Dense table of transition rates, usable as a [`CouplingEvaluator`].

use crate::bte::statistics::CalcStatistics;
use crate::core::traits::CouplingEvaluator;
use crate::error::BteError;
use faer::Mat;

/// Temperature-independent rates `P_ij` held in a symmetric dense matrix.
#[derive(Debug, Clone)]
pub struct TabulatedCoupling {
    rates: Mat<f64>,
}

impl TabulatedCoupling {
    /// Builds the table from its upper triangle; `f` is called with `i < j` only.
    pub fn from_upper<F>(num_states: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut rates = Mat::zeros(num_states, num_states);
        for i in 0..num_states {
            for j in i + 1..num_states {
                let p = f(i, j);
                rates[(i, j)] = p;
                rates[(j, i)] = p;
            }
        }
        Self { rates }
    }

    /// Checks that `rates` is square, symmetric and non-negative off the diagonal.
    pub fn new(rates: Mat<f64>) -> Result<Self, BteError> {
        let n = rates.nrows();
        if rates.ncols() != n {
            return Err(BteError::DimensionMismatch(format!(
                "coupling table is {}x{}",
                n,
                rates.ncols()
            )));
        }
        for i in 0..n {
            for j in i + 1..n {
                let (p, q) = (rates[(i, j)], rates[(j, i)]);
                if p < 0.0 || (p - q).abs() > 1e-12 * p.abs().max(q.abs()).max(1.0) {
                    return Err(BteError::DimensionMismatch(format!(
                        "coupling table entry ({i}, {j}) is negative or asymmetric"
                    )));
                }
            }
        }
        Ok(Self { rates })
    }

    pub fn num_states(&self) -> usize {
        self.rates.nrows()
    }
}

impl CouplingEvaluator for TabulatedCoupling {
    fn transition_rate(&self, _calc: &CalcStatistics, i: usize, j: usize) -> f64 {
        if i == j { 0.0 } else { self.rates[(i, j)] }
    }
}
