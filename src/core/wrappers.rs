//! [`Scalar`] implementations over faer for real (`f64`) and complex (`c64`) matrices.
//!
//! The dense kernels (product, self-adjoint eigendecomposition) are delegated to
//! faer; the distributed layer only moves entries around and calls these.

use crate::core::traits::{Op, Scalar};
use crate::error::BteError;
use faer::{Mat, MatRef, Side, c64};

/// Reorders eigenpairs by ascending eigenvalue with a stable sort.
fn sort_eigenpairs<T: Copy>(values: Vec<f64>, vectors: MatRef<'_, T>) -> (Vec<f64>, Mat<T>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let sorted = order.iter().map(|&k| values[k]).collect();
    let vecs = Mat::from_fn(vectors.nrows(), order.len(), |i, j| vectors[(i, order[j])]);
    (sorted, vecs)
}

impl Scalar for f64 {
    const PARTS: usize = 1;

    fn write_parts(self, out: &mut [f64]) {
        out[0] = self;
    }
    fn from_parts(parts: &[f64]) -> Self {
        parts[0]
    }
    fn conj(self) -> Self {
        self
    }
    fn modulus(self) -> f64 {
        self.abs()
    }
    fn from_real(x: f64) -> Self {
        x
    }

    fn apply_op(m: MatRef<'_, f64>, op: Op) -> Mat<f64> {
        match op {
            Op::NoTrans => Mat::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)]),
            Op::Trans | Op::Adjoint => Mat::from_fn(m.ncols(), m.nrows(), |i, j| m[(j, i)]),
        }
    }

    fn matmul(lhs: MatRef<'_, f64>, rhs: MatRef<'_, f64>) -> Mat<f64> {
        lhs * rhs
    }

    fn hermitian_eigen(m: MatRef<'_, f64>) -> Result<(Vec<f64>, Mat<f64>), BteError> {
        let evd = m
            .self_adjoint_eigen(Side::Lower)
            .map_err(|e| BteError::Eigen(format!("{e:?}")))?;
        let s = evd.S().column_vector();
        let values = (0..s.nrows()).map(|i| s[i]).collect();
        Ok(sort_eigenpairs(values, evd.U()))
    }
}

impl Scalar for c64 {
    const PARTS: usize = 2;

    fn write_parts(self, out: &mut [f64]) {
        out[0] = self.re;
        out[1] = self.im;
    }
    fn from_parts(parts: &[f64]) -> Self {
        c64::new(parts[0], parts[1])
    }
    fn conj(self) -> Self {
        c64::new(self.re, -self.im)
    }
    fn modulus(self) -> f64 {
        self.re.hypot(self.im)
    }
    fn from_real(x: f64) -> Self {
        c64::new(x, 0.0)
    }

    fn apply_op(m: MatRef<'_, c64>, op: Op) -> Mat<c64> {
        match op {
            Op::NoTrans => Mat::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)]),
            Op::Trans => Mat::from_fn(m.ncols(), m.nrows(), |i, j| m[(j, i)]),
            Op::Adjoint => Mat::from_fn(m.ncols(), m.nrows(), |i, j| {
                let z = m[(j, i)];
                c64::new(z.re, -z.im)
            }),
        }
    }

    fn matmul(lhs: MatRef<'_, c64>, rhs: MatRef<'_, c64>) -> Mat<c64> {
        lhs * rhs
    }

    fn hermitian_eigen(m: MatRef<'_, c64>) -> Result<(Vec<f64>, Mat<c64>), BteError> {
        let evd = m
            .self_adjoint_eigen(Side::Lower)
            .map_err(|e| BteError::Eigen(format!("{e:?}")))?;
        let s = evd.S().column_vector();
        let values = (0..s.nrows()).map(|i| s[i].re).collect();
        Ok(sort_eigenpairs(values, evd.U()))
    }
}
