//! Dense matrix that is either replicated on every rank or distributed
//! block-cyclically over the process grid.
//!
//! Both storage modes expose the same operations; the distributed mode must
//! agree with the local one to solver tolerance, which is what allows a
//! distributed algorithm to be debugged on a single process.

use crate::core::traits::{Op, Scalar};
use crate::error::BteError;
use crate::matrix::block_cyclic::BlockCyclicLayout;
use crate::parallel::{Comm, ProcessGrid};
use faer::{Mat, MatRef};

/// Relative tolerance of the hermiticity check performed before diagonalization.
const HERMITIAN_TOL: f64 = 1e-10;

pub enum Storage<T> {
    /// Full matrix, identical on every rank.
    Local(Mat<T>),
    /// Locally owned blocks of a block-cyclic distribution.
    BlockCyclic { layout: BlockCyclicLayout, local: Mat<T> },
}

pub struct DistributedMatrix<'a, T: Scalar> {
    comm: &'a dyn Comm,
    num_rows: usize,
    num_cols: usize,
    storage: Storage<T>,
}

impl<'a, T: Scalar> DistributedMatrix<'a, T> {
    /// Zero matrix; `block_size = None` selects local storage.
    pub fn zeros(
        comm: &'a dyn Comm,
        num_rows: usize,
        num_cols: usize,
        block_size: Option<usize>,
    ) -> Result<Self, BteError> {
        let storage = match block_size {
            None => Storage::Local(Mat::from_fn(num_rows, num_cols, |_, _| T::zero())),
            Some(nb) => {
                if nb == 0 {
                    return Err(BteError::Distribution("block size must be positive"));
                }
                let grid = ProcessGrid::for_comm(comm)?;
                let layout = BlockCyclicLayout::new(num_rows, num_cols, nb, grid, comm.rank());
                let local = Mat::from_fn(layout.local_rows, layout.local_cols, |_, _| T::zero());
                Storage::BlockCyclic { layout, local }
            }
        };
        Ok(Self { comm, num_rows, num_cols, storage })
    }

    /// Distributes a matrix known in full on every rank.
    pub fn from_global(
        comm: &'a dyn Comm,
        global: MatRef<'_, T>,
        block_size: Option<usize>,
    ) -> Result<Self, BteError> {
        let mut m = Self::zeros(comm, global.nrows(), global.ncols(), block_size)?;
        match &mut m.storage {
            Storage::Local(mat) => {
                for j in 0..global.ncols() {
                    for i in 0..global.nrows() {
                        mat[(i, j)] = global[(i, j)];
                    }
                }
            }
            Storage::BlockCyclic { layout, local } => {
                for lj in 0..layout.local_cols {
                    for li in 0..layout.local_rows {
                        let (i, j) = layout.local_to_global(li, lj);
                        local[(li, lj)] = global[(i, j)];
                    }
                }
            }
        }
        Ok(m)
    }

    pub fn comm(&self) -> &'a dyn Comm {
        self.comm
    }
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }
    pub fn is_distributed(&self) -> bool {
        matches!(self.storage, Storage::BlockCyclic { .. })
    }
    pub fn block_size(&self) -> Option<usize> {
        match &self.storage {
            Storage::Local(_) => None,
            Storage::BlockCyclic { layout, .. } => Some(layout.block_size),
        }
    }

    pub fn block_cyclic_layout(&self) -> Result<&BlockCyclicLayout, BteError> {
        match &self.storage {
            Storage::BlockCyclic { layout, .. } => Ok(layout),
            Storage::Local(_) => Err(BteError::Distribution(
                "block-cyclic layout requested from a local matrix",
            )),
        }
    }

    pub fn local(&self) -> MatRef<'_, T> {
        match &self.storage {
            Storage::Local(m) => m.as_ref(),
            Storage::BlockCyclic { local, .. } => local.as_ref(),
        }
    }

    pub fn global_to_local(&self, i: usize, j: usize) -> Option<(usize, usize)> {
        match &self.storage {
            Storage::Local(_) => (i < self.num_rows && j < self.num_cols).then_some((i, j)),
            Storage::BlockCyclic { layout, .. } => layout.global_to_local(i, j),
        }
    }

    pub fn local_to_global(&self, li: usize, lj: usize) -> (usize, usize) {
        match &self.storage {
            Storage::Local(_) => (li, lj),
            Storage::BlockCyclic { layout, .. } => layout.local_to_global(li, lj),
        }
    }

    /// Rank owning `(i, j)`; every rank owns everything in local storage.
    pub fn owner_of(&self, i: usize, j: usize) -> usize {
        match &self.storage {
            Storage::Local(_) => self.comm.rank(),
            Storage::BlockCyclic { layout, .. } => layout.owner_of(i, j),
        }
    }

    /// Global indices of the locally stored rows, in local order.
    pub fn owned_rows(&self) -> Vec<usize> {
        match &self.storage {
            Storage::Local(_) => (0..self.num_rows).collect(),
            Storage::BlockCyclic { layout, .. } => layout.owned_rows(),
        }
    }

    pub fn owned_cols(&self) -> Vec<usize> {
        match &self.storage {
            Storage::Local(_) => (0..self.num_cols).collect(),
            Storage::BlockCyclic { layout, .. } => layout.owned_cols(),
        }
    }

    /// Global `(i, j)` of every locally stored entry.
    pub fn local_entries(&self) -> Vec<(usize, usize)> {
        let rows = self.owned_rows();
        let cols = self.owned_cols();
        let mut out = Vec::with_capacity(rows.len() * cols.len());
        for &j in &cols {
            for &i in &rows {
                out.push((i, j));
            }
        }
        out
    }

    pub fn get(&self, i: usize, j: usize) -> Option<T> {
        let (li, lj) = self.global_to_local(i, j)?;
        Some(self.local()[(li, lj)])
    }

    pub fn get_mut(&mut self, i: usize, j: usize) -> Option<&mut T> {
        let (li, lj) = self.global_to_local(i, j)?;
        Some(match &mut self.storage {
            Storage::Local(m) => &mut m[(li, lj)],
            Storage::BlockCyclic { local, .. } => &mut local[(li, lj)],
        })
    }

    /// Applies `f(i, j, value)` to every locally stored entry, in place.
    pub fn map_local<F>(&mut self, f: F)
    where
        F: Fn(usize, usize, T) -> T,
    {
        match &mut self.storage {
            Storage::Local(m) => {
                for j in 0..m.ncols() {
                    for i in 0..m.nrows() {
                        m[(i, j)] = f(i, j, m[(i, j)]);
                    }
                }
            }
            Storage::BlockCyclic { layout, local } => {
                for lj in 0..layout.local_cols {
                    for li in 0..layout.local_rows {
                        let (i, j) = layout.local_to_global(li, lj);
                        local[(li, lj)] = f(i, j, local[(li, lj)]);
                    }
                }
            }
        }
    }

    /// Replicates the full matrix on every rank (collective in distributed mode).
    pub fn to_global(&self) -> Result<Mat<T>, BteError> {
        match &self.storage {
            Storage::Local(m) => Ok(m.clone()),
            Storage::BlockCyclic { layout, local } => {
                let (n, m) = (self.num_rows, self.num_cols);
                let mut buf = vec![0.0; n * m * T::PARTS];
                for lj in 0..layout.local_cols {
                    for li in 0..layout.local_rows {
                        let (i, j) = layout.local_to_global(li, lj);
                        let at = (j * n + i) * T::PARTS;
                        local[(li, lj)].write_parts(&mut buf[at..at + T::PARTS]);
                    }
                }
                self.comm.all_reduce_sum(&mut buf)?;
                Ok(Mat::from_fn(n, m, |i, j| {
                    let at = (j * n + i) * T::PARTS;
                    T::from_parts(&buf[at..at + T::PARTS])
                }))
            }
        }
    }

    fn shape_after(&self, op: Op) -> (usize, usize) {
        match op {
            Op::NoTrans => (self.num_rows, self.num_cols),
            Op::Trans | Op::Adjoint => (self.num_cols, self.num_rows),
        }
    }

    /// The block `rows x cols` of `op(self)`, replicated on every rank.
    ///
    /// Collective: each rank contributes the entries it owns to one sum
    /// reduction of the panel, so only the panel is ever held in full.
    fn gather_op_panel(&self, op: Op, rows: &[usize], cols: &[usize]) -> Result<Mat<T>, BteError> {
        let (op_rows, op_cols) = self.shape_after(op);
        let mut row_at = vec![None; op_rows];
        for (p, &r) in rows.iter().enumerate() {
            row_at[r] = Some(p);
        }
        let mut col_at = vec![None; op_cols];
        for (q, &c) in cols.iter().enumerate() {
            col_at[c] = Some(q);
        }

        let height = rows.len();
        let mut buf = vec![0.0; height * cols.len() * T::PARTS];
        let local = self.local();
        for lj in 0..local.ncols() {
            for li in 0..local.nrows() {
                let (i, j) = self.local_to_global(li, lj);
                let x = local[(li, lj)];
                let (r, c, x) = match op {
                    Op::NoTrans => (i, j, x),
                    Op::Trans => (j, i, x),
                    Op::Adjoint => (j, i, x.conj()),
                };
                if let (Some(p), Some(q)) = (row_at[r], col_at[c]) {
                    let at = (q * height + p) * T::PARTS;
                    x.write_parts(&mut buf[at..at + T::PARTS]);
                }
            }
        }
        self.comm.all_reduce_sum(&mut buf)?;
        Ok(Mat::from_fn(height, cols.len(), |p, q| {
            let at = (q * height + p) * T::PARTS;
            T::from_parts(&buf[at..at + T::PARTS])
        }))
    }

    /// Matrix product `op_self(self) * op_other(other)`.
    ///
    /// In distributed mode the row panels of `op_self(self)` and the column
    /// panels of `op_other(other)` are gathered one process row (column) at a
    /// time; each rank keeps its own panels and computes the blocks of the
    /// result it owns.
    pub fn prod(
        &self,
        other: &DistributedMatrix<'a, T>,
        op_self: Op,
        op_other: Op,
    ) -> Result<DistributedMatrix<'a, T>, BteError> {
        if self.block_size() != other.block_size() {
            return Err(BteError::Distribution(
                "product of matrices with different storage modes",
            ));
        }
        let (m, k) = self.shape_after(op_self);
        let (k2, n) = other.shape_after(op_other);
        if k != k2 {
            return Err(BteError::DimensionMismatch(format!(
                "cannot multiply {m}x{k} by {k2}x{n}"
            )));
        }

        match (&self.storage, &other.storage) {
            (Storage::Local(a), Storage::Local(b)) => {
                let a = T::apply_op(a.as_ref(), op_self);
                let b = T::apply_op(b.as_ref(), op_other);
                Ok(DistributedMatrix {
                    comm: self.comm,
                    num_rows: m,
                    num_cols: n,
                    storage: Storage::Local(T::matmul(a.as_ref(), b.as_ref())),
                })
            }
            (Storage::BlockCyclic { layout, .. }, Storage::BlockCyclic { .. }) => {
                let out = layout.reshaped(m, n);
                let inner: Vec<usize> = (0..k).collect();
                let mut a_rows = None;
                for prow in 0..out.grid.rows {
                    let rows: Vec<usize> = (0..m).filter(|&i| out.row_owner(i) == prow).collect();
                    let panel = self.gather_op_panel(op_self, &rows, &inner)?;
                    if prow == out.prow {
                        a_rows = Some(panel);
                    }
                }
                let mut b_cols = None;
                for pcol in 0..out.grid.cols {
                    let cols: Vec<usize> = (0..n).filter(|&j| out.col_owner(j) == pcol).collect();
                    let panel = other.gather_op_panel(op_other, &inner, &cols)?;
                    if pcol == out.pcol {
                        b_cols = Some(panel);
                    }
                }
                let (Some(a_rows), Some(b_cols)) = (a_rows, b_cols) else {
                    return Err(BteError::Distribution("rank outside the process grid"));
                };
                let local = T::matmul(a_rows.as_ref(), b_cols.as_ref());
                Ok(DistributedMatrix {
                    comm: self.comm,
                    num_rows: m,
                    num_cols: n,
                    storage: Storage::BlockCyclic { layout: out, local },
                })
            }
            _ => Err(BteError::Distribution(
                "product of matrices with different storage modes",
            )),
        }
    }

    /// Eigenvalues (ascending) and eigenvectors of a hermitian matrix.
    ///
    /// Eigenvectors are returned in the storage mode of `self`; column `k`
    /// belongs to eigenvalue `k`.
    pub fn diagonalize(&self) -> Result<(Vec<f64>, DistributedMatrix<'a, T>), BteError> {
        if self.num_rows != self.num_cols {
            return Err(BteError::DimensionMismatch(format!(
                "cannot diagonalize a {}x{} matrix",
                self.num_rows, self.num_cols
            )));
        }
        let full = self.to_global()?;
        let n = self.num_rows;
        let mut scale = 1.0f64;
        let mut asymmetry = 0.0f64;
        for j in 0..n {
            for i in 0..n {
                scale = scale.max(full[(i, j)].modulus());
                asymmetry = asymmetry.max((full[(i, j)] - full[(j, i)].conj()).modulus());
            }
        }
        if asymmetry > HERMITIAN_TOL * scale {
            return Err(BteError::NotHermitian(asymmetry));
        }

        let (values, vectors) = T::hermitian_eigen(full.as_ref())?;
        let vectors = DistributedMatrix::from_global(self.comm, vectors.as_ref(), self.block_size())?;
        Ok((values, vectors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::{SerialComm, ThreadComm};
    use approx::assert_abs_diff_eq;
    use faer::c64;

    fn test_matrix(n: usize, m: usize) -> Mat<f64> {
        Mat::from_fn(n, m, |i, j| ((i * 7 + j * 3) % 11) as f64 - 4.5 + 0.1 * i as f64)
    }

    #[test]
    fn local_index_mapping_is_identity() {
        let comm = SerialComm;
        let a = DistributedMatrix::<f64>::zeros(&comm, 3, 4, None).unwrap();
        assert_eq!(a.global_to_local(2, 3), Some((2, 3)));
        assert_eq!(a.global_to_local(3, 0), None);
        assert_eq!(a.local_to_global(1, 2), (1, 2));
        assert!(!a.is_distributed());
        assert!(matches!(a.block_cyclic_layout(), Err(BteError::Distribution(_))));
    }

    #[test]
    fn mixed_modes_fail_fast() {
        let comm = SerialComm;
        let a = DistributedMatrix::<f64>::zeros(&comm, 2, 2, None).unwrap();
        let b = DistributedMatrix::<f64>::zeros(&comm, 2, 2, Some(1)).unwrap();
        assert!(matches!(
            a.prod(&b, Op::NoTrans, Op::NoTrans),
            Err(BteError::Distribution(_))
        ));
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let comm = SerialComm;
        let a = DistributedMatrix::<f64>::zeros(&comm, 2, 3, None).unwrap();
        let b = DistributedMatrix::<f64>::zeros(&comm, 2, 3, None).unwrap();
        assert!(matches!(
            a.prod(&b, Op::NoTrans, Op::NoTrans),
            Err(BteError::DimensionMismatch(_))
        ));
        assert!(a.prod(&b, Op::NoTrans, Op::Trans).is_ok());
    }

    #[test]
    fn block_cyclic_gather_round_trip() {
        let global = test_matrix(7, 5);
        let results = ThreadComm::run(4, |comm| {
            let a = DistributedMatrix::from_global(comm, global.as_ref(), Some(2)).unwrap();
            a.to_global().unwrap()
        });
        for g in results {
            for j in 0..5 {
                for i in 0..7 {
                    assert_eq!(g[(i, j)], global[(i, j)]);
                }
            }
        }
    }

    #[test]
    fn non_hermitian_input_is_rejected() {
        let comm = SerialComm;
        let a = Mat::from_fn(2, 2, |i, j| if i == 0 && j == 1 { 1.0 } else { 0.0 });
        let a = DistributedMatrix::from_global(&comm, a.as_ref(), None).unwrap();
        assert!(matches!(a.diagonalize(), Err(BteError::NotHermitian(_))));
    }

    #[test]
    fn complex_hermitian_diagonalization() {
        let comm = SerialComm;
        // [[2, i], [-i, 2]] has eigenvalues 1 and 3
        let a = Mat::from_fn(2, 2, |i, j| match (i, j) {
            (0, 1) => c64::new(0.0, 1.0),
            (1, 0) => c64::new(0.0, -1.0),
            _ => c64::new(2.0, 0.0),
        });
        let a = DistributedMatrix::from_global(&comm, a.as_ref(), None).unwrap();
        let (vals, vecs) = a.diagonalize().unwrap();
        assert_abs_diff_eq!(vals[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(vals[1], 3.0, epsilon = 1e-12);
        let v = vecs.to_global().unwrap();
        let norm: f64 = (0..2).map(|i| v[(i, 0)].modulus().powi(2)).sum();
        assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn panels_hold_only_the_requested_block() {
        let global = test_matrix(7, 5);
        let rows = [1usize, 4];
        let cols = [0usize, 2, 6];
        let results = ThreadComm::run(4, |comm| {
            let a = DistributedMatrix::from_global(comm, global.as_ref(), Some(2)).unwrap();
            a.gather_op_panel(Op::Trans, &rows, &cols).unwrap()
        });
        for panel in results {
            assert_eq!((panel.nrows(), panel.ncols()), (2, 3));
            for (p, &r) in rows.iter().enumerate() {
                for (q, &c) in cols.iter().enumerate() {
                    assert_eq!(panel[(p, q)], global[(c, r)]);
                }
            }
        }
    }

    #[test]
    fn block_cyclic_prod_matches_local_on_uneven_grid() {
        let a = test_matrix(7, 5);
        let b = test_matrix(7, 3);
        let serial = SerialComm;
        let la = DistributedMatrix::from_global(&serial, a.as_ref(), None).unwrap();
        let lb = DistributedMatrix::from_global(&serial, b.as_ref(), None).unwrap();
        let expected = la.prod(&lb, Op::Trans, Op::NoTrans).unwrap().to_global().unwrap();
        let results = ThreadComm::run(6, |comm| {
            let da = DistributedMatrix::from_global(comm, a.as_ref(), Some(2)).unwrap();
            let db = DistributedMatrix::from_global(comm, b.as_ref(), Some(2)).unwrap();
            da.prod(&db, Op::Trans, Op::NoTrans).unwrap().to_global().unwrap()
        });
        for c in results {
            for j in 0..3 {
                for i in 0..5 {
                    assert_abs_diff_eq!(c[(i, j)], expected[(i, j)], epsilon = 1e-12);
                }
            }
        }
    }
}
