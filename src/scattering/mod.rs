//! The scattering matrix of the linearized BTE.
//!
//! In the canonical basis the operator is symmetric:
//! `A_ij = -P_ij` off the diagonal and `A_ii = sum_j P_ij + N_i |v_i| / L_b`,
//! with `P_ij` the equilibrium transition rate returned by the coupling and
//! the last term the optional boundary scattering. The BTE reads `A f = b`.
//!
//! The matrix moves through `Constructed -> Assembled -> Omega -> Diagonalized`;
//! operations invalid in the current state return [`BteError::MatrixState`].

use crate::bte::system::TransportSystem;
use crate::bte::vector::{DIMENSIONS, VectorBte};
use crate::core::traits::{CouplingEvaluator, Scalar};
use crate::error::BteError;
use crate::matrix::DistributedMatrix;
use crate::parallel::{Comm, map_range};
use faer::Mat;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixOptions {
    /// Store the full matrix; otherwise rows are recomputed for every product.
    pub in_memory: bool,
    /// Evaluate each pair once and mirror it.
    pub use_symmetries: bool,
    /// `Some(nb)` distributes the matrix block-cyclically with blocks of `nb`.
    pub block_size: Option<usize>,
    /// Enables boundary scattering `|v| / L_b`.
    pub boundary_length: Option<f64>,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self { in_memory: true, use_symmetries: false, block_size: None, boundary_length: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatrixState {
    Constructed,
    Assembled,
    /// Rescaled to `Omega = N^-1/2 A N^-1/2`.
    Omega,
    /// The matrix has been handed over to the eigensolver.
    Diagonalized,
}

impl MatrixState {
    pub fn name(self) -> &'static str {
        match self {
            MatrixState::Constructed => "constructed",
            MatrixState::Assembled => "assembled",
            MatrixState::Omega => "omega",
            MatrixState::Diagonalized => "diagonalized",
        }
    }
}

/// Single-mode relaxation times, replicated over the three directions.
#[derive(Debug, Clone, Serialize)]
pub struct SingleModeTimes {
    pub times: VectorBte,
    /// `(calc, state)` pairs with a non-positive or non-finite rate; their time is zero.
    pub degenerate: Vec<(usize, usize)>,
}

/// Rate lookup shared by assembly and on-the-fly products.
#[derive(Clone, Copy)]
struct Rates<'s> {
    system: &'s TransportSystem<'s>,
    coupling: &'s dyn CouplingEvaluator,
    use_symmetries: bool,
}

impl Rates<'_> {
    fn get(&self, calc: usize, i: usize, j: usize) -> f64 {
        let factors = &self.system.factors;
        if i == j || !factors.is_active(calc, i) || !factors.is_active(calc, j) {
            return 0.0;
        }
        let (i, j) = if self.use_symmetries { (i.min(j), i.max(j)) } else { (i, j) };
        self.coupling.transition_rate(self.system.calc(calc), i, j)
    }
}

pub struct ScatteringMatrix<'a> {
    comm: &'a dyn Comm,
    system: &'a TransportSystem<'a>,
    coupling: &'a dyn CouplingEvaluator,
    options: MatrixOptions,
    matrix: Option<DistributedMatrix<'a, f64>>,
    /// `[calc][state]`
    linewidths: Vec<f64>,
    diagonal: OnceLock<VectorBte>,
    state: MatrixState,
}

impl<'a> ScatteringMatrix<'a> {
    pub fn new(
        comm: &'a dyn Comm,
        options: MatrixOptions,
        system: &'a TransportSystem<'a>,
        coupling: &'a dyn CouplingEvaluator,
    ) -> Result<Self, BteError> {
        let num_calcs = system.num_calcs();
        let n = system.num_states();
        if options.in_memory && num_calcs != 1 {
            return Err(BteError::InMemoryMultipleCalculations { num_calcs });
        }
        let matrix = if options.in_memory {
            Some(DistributedMatrix::zeros(comm, n, n, options.block_size)?)
        } else {
            None
        };
        Ok(Self {
            comm,
            system,
            coupling,
            options,
            matrix,
            linewidths: vec![0.0; num_calcs * n],
            diagonal: OnceLock::new(),
            state: MatrixState::Constructed,
        })
    }

    pub fn comm(&self) -> &'a dyn Comm {
        self.comm
    }
    pub fn system(&self) -> &'a TransportSystem<'a> {
        self.system
    }
    pub fn options(&self) -> &MatrixOptions {
        &self.options
    }
    pub fn state(&self) -> MatrixState {
        self.state
    }
    pub fn num_states(&self) -> usize {
        self.system.num_states()
    }
    pub fn num_calcs(&self) -> usize {
        self.system.num_calcs()
    }
    pub fn is_in_memory(&self) -> bool {
        self.options.in_memory
    }

    /// Diagonal scattering rates of one calculation.
    pub fn linewidths(&self, calc: usize) -> &[f64] {
        let n = self.num_states();
        &self.linewidths[calc * n..(calc + 1) * n]
    }

    /// The stored operator, if any.
    pub fn matrix(&self) -> Option<&DistributedMatrix<'a, f64>> {
        self.matrix.as_ref()
    }

    fn require(&self, operation: &'static str, allowed: &[MatrixState]) -> Result<(), BteError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(BteError::MatrixState { operation, state: self.state.name() })
        }
    }

    fn rates(&self) -> Rates<'a> {
        Rates {
            system: self.system,
            coupling: self.coupling,
            use_symmetries: self.options.use_symmetries,
        }
    }

    fn add_boundary(&self, linewidths: &mut [f64]) {
        let Some(length) = self.options.boundary_length else {
            return;
        };
        let n = self.num_states();
        let bands = self.system.bands;
        for (k, lw) in linewidths.iter_mut().enumerate() {
            let (c, s) = (k / n, k % n);
            let factor = self.system.factors.get(c, s);
            if factor > 0.0 {
                let v = bands.group_velocity(s);
                let speed = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
                *lw += factor * speed / length;
            }
        }
    }

    /// Evaluates the couplings and fills the matrix (or only the linewidths
    /// when the matrix is not kept in memory). Collective; allowed once.
    #[tracing::instrument(name = "Scattering matrix assembly", level = "info", skip_all)]
    pub fn setup(&mut self) -> Result<(), BteError> {
        self.require("set up", &[MatrixState::Constructed])?;
        let linewidths = match self.matrix.take() {
            Some(mut matrix) => {
                let lw = if matrix.is_distributed() {
                    self.assemble_block_cyclic(&mut matrix)
                } else {
                    self.assemble_local(&mut matrix)
                };
                self.matrix = Some(matrix);
                lw?
            }
            None => self.assemble_linewidths()?,
        };
        self.linewidths = linewidths;
        self.state = MatrixState::Assembled;
        if self.comm.is_head() {
            info!(
                num_states = self.num_states(),
                in_memory = self.options.in_memory,
                distributed = self.matrix.as_ref().is_some_and(|m| m.is_distributed()),
                "scattering matrix assembled"
            );
        }
        Ok(())
    }

    /// Rows are split by work division; with symmetries only `j > i` is evaluated.
    fn assemble_local(&self, matrix: &mut DistributedMatrix<'a, f64>) -> Result<Vec<f64>, BteError> {
        let n = self.num_states();
        let rates = self.rates();
        let sym = self.options.use_symmetries;
        let rows = self.comm.divide_work(n);
        debug!(rank = self.comm.rank(), head = rows.start, tail = rows.end, "assembling rows");

        let computed = map_range(rows.clone(), |i| {
            let start = if sym { i + 1 } else { 0 };
            (start..n).map(|j| rates.get(0, i, j)).collect::<Vec<_>>()
        });

        // column-major, as gathered by the reduction
        let mut buf = vec![0.0; n * n];
        let mut linewidths = vec![0.0; n];
        for (i, row) in rows.zip(computed) {
            let start = if sym { i + 1 } else { 0 };
            for (j, p) in (start..n).zip(row) {
                if p == 0.0 {
                    continue;
                }
                buf[j * n + i] = -p;
                linewidths[i] += p;
                if sym {
                    buf[i * n + j] = -p;
                    linewidths[j] += p;
                }
            }
        }
        self.comm.all_reduce_sum(&mut buf)?;
        self.comm.all_reduce_sum(&mut linewidths)?;
        self.add_boundary(&mut linewidths);

        matrix.map_local(|i, j, _| if i == j { linewidths[i] } else { buf[j * n + i] });
        Ok(linewidths)
    }

    /// Every rank evaluates the entries it owns.
    fn assemble_block_cyclic(
        &self,
        matrix: &mut DistributedMatrix<'a, f64>,
    ) -> Result<Vec<f64>, BteError> {
        if self.options.use_symmetries {
            return self.assemble_block_cyclic_symmetric(matrix);
        }
        let n = self.num_states();
        let rates = self.rates();
        let entries = matrix.local_entries();
        debug!(rank = self.comm.rank(), owned = entries.len(), "assembling local blocks");

        let values = map_range(0..entries.len(), |k| {
            let (i, j) = entries[k];
            rates.get(0, i, j)
        });

        let mut linewidths = vec![0.0; n];
        for (&(i, _), &p) in entries.iter().zip(&values) {
            linewidths[i] += p;
        }
        self.comm.all_reduce_sum(&mut linewidths)?;
        self.add_boundary(&mut linewidths);

        for (&(i, j), &p) in entries.iter().zip(&values) {
            if let Some(a) = matrix.get_mut(i, j) {
                *a = if i == j { linewidths[i] } else { -p };
            }
        }
        Ok(linewidths)
    }

    /// Each rank evaluates its owned pairs with `i < j` into a packed upper
    /// triangle; after the reduction both triangles are filled from it.
    fn assemble_block_cyclic_symmetric(
        &self,
        matrix: &mut DistributedMatrix<'a, f64>,
    ) -> Result<Vec<f64>, BteError> {
        let n = self.num_states();
        let rates = self.rates();
        let upper: Vec<(usize, usize)> =
            matrix.local_entries().into_iter().filter(|&(i, j)| i < j).collect();
        debug!(rank = self.comm.rank(), pairs = upper.len(), "assembling irreducible pairs");

        let values = map_range(0..upper.len(), |k| {
            let (i, j) = upper[k];
            rates.get(0, i, j)
        });
        let mut packed = vec![0.0; n * n.saturating_sub(1) / 2];
        for (&(i, j), &p) in upper.iter().zip(&values) {
            packed[packed_upper(n, i, j)] = p;
        }
        self.comm.all_reduce_sum(&mut packed)?;

        let mut linewidths = vec![0.0; n];
        for i in 0..n {
            for j in i + 1..n {
                let p = packed[packed_upper(n, i, j)];
                linewidths[i] += p;
                linewidths[j] += p;
            }
        }
        self.add_boundary(&mut linewidths);

        matrix.map_local(|i, j, _| match i.cmp(&j) {
            std::cmp::Ordering::Equal => linewidths[i],
            std::cmp::Ordering::Less => -packed[packed_upper(n, i, j)],
            std::cmp::Ordering::Greater => -packed[packed_upper(n, j, i)],
        });
        Ok(linewidths)
    }

    /// Linewidths of every calculation, without storing the matrix.
    fn assemble_linewidths(&self) -> Result<Vec<f64>, BteError> {
        let n = self.num_states();
        let num_calcs = self.num_calcs();
        let rates = self.rates();
        let rows = self.comm.divide_work(n);
        let mut linewidths = vec![0.0; num_calcs * n];
        for c in 0..num_calcs {
            let sums = map_range(rows.clone(), |i| (0..n).map(|j| rates.get(c, i, j)).sum::<f64>());
            for (i, s) in rows.clone().zip(sums) {
                linewidths[c * n + i] = s;
            }
        }
        self.comm.all_reduce_sum(&mut linewidths)?;
        self.add_boundary(&mut linewidths);
        Ok(linewidths)
    }

    /// Diagonal of the current operator, replicated over the directions. Cached.
    pub fn diagonal(&self) -> Result<&VectorBte, BteError> {
        self.require(
            "extract the diagonal of",
            &[MatrixState::Assembled, MatrixState::Omega],
        )?;
        if let Some(d) = self.diagonal.get() {
            return Ok(d);
        }
        let n = self.num_states();
        let values = match &self.matrix {
            Some(m) => {
                let mut buf = vec![0.0; n];
                for (i, x) in buf.iter_mut().enumerate() {
                    if let Some(a) = m.get(i, i) {
                        *x = a;
                    }
                }
                if m.is_distributed() {
                    self.comm.all_reduce_sum(&mut buf)?;
                }
                buf
            }
            None => self.linewidths.clone(),
        };
        let d = VectorBte::from_fn(self.num_calcs(), n, |c, _, s| values[c * n + s]);
        Ok(self.diagonal.get_or_init(|| d))
    }

    /// `A v` (or `Omega v` after [`a2_omega`](Self::a2_omega)). Collective.
    pub fn dot(&self, v: &VectorBte) -> Result<VectorBte, BteError> {
        self.dot_many(&[v])?
            .into_iter()
            .next()
            .ok_or_else(|| BteError::DimensionMismatch("empty product".into()))
    }

    /// Applies the operator to several vectors with one batched product and
    /// one reduction.
    pub fn dot_many(&self, vectors: &[&VectorBte]) -> Result<Vec<VectorBte>, BteError> {
        self.require("multiply with", &[MatrixState::Assembled, MatrixState::Omega])?;
        let (num_calcs, n) = (self.num_calcs(), self.num_states());
        for v in vectors {
            if v.num_calcs() != num_calcs || v.num_states() != n {
                return Err(BteError::DimensionMismatch(format!(
                    "vector of {}x{} applied to a matrix over {}x{}",
                    v.num_calcs(),
                    v.num_states(),
                    num_calcs,
                    n
                )));
            }
        }
        if vectors.is_empty() || n == 0 {
            return Ok(vectors.iter().map(|v| (*v).clone()).collect());
        }

        let block = num_calcs * DIMENSIONS * n;
        let mut out = vec![0.0; vectors.len() * block];
        match &self.matrix {
            Some(m) if m.is_distributed() => dot_block_cyclic(m, vectors, &mut out),
            Some(m) => dot_local(self.comm, m, vectors, &mut out),
            None => self.dot_on_the_fly(vectors, &mut out),
        }
        self.comm.all_reduce_sum(&mut out)?;
        Ok(out
            .chunks_exact(block)
            .map(|chunk| VectorBte::from_vec(num_calcs, n, chunk.to_vec()))
            .collect())
    }

    fn dot_on_the_fly(&self, vectors: &[&VectorBte], out: &mut [f64]) {
        let (num_calcs, n) = (self.num_calcs(), self.num_states());
        let block = num_calcs * DIMENSIONS * n;
        let width = vectors.len() * DIMENSIONS;
        let rates = self.rates();
        let rows = self.comm.divide_work(n);
        for c in 0..num_calcs {
            let linewidths = self.linewidths(c);
            let partial = map_range(rows.clone(), |i| {
                let mut acc = vec![0.0; width];
                for (v, x) in vectors.iter().enumerate() {
                    for d in 0..DIMENSIONS {
                        acc[v * DIMENSIONS + d] = linewidths[i] * x.get(c, d, i);
                    }
                }
                for j in 0..n {
                    let p = rates.get(c, i, j);
                    if p == 0.0 {
                        continue;
                    }
                    for (v, x) in vectors.iter().enumerate() {
                        for d in 0..DIMENSIONS {
                            acc[v * DIMENSIONS + d] -= p * x.get(c, d, j);
                        }
                    }
                }
                acc
            });
            for (i, acc) in rows.clone().zip(partial) {
                for (col, y) in acc.into_iter().enumerate() {
                    let (v, d) = (col / DIMENSIONS, col % DIMENSIONS);
                    out[v * block + (c * DIMENSIONS + d) * n + i] = y;
                }
            }
        }
    }

    /// `dot(v) - diagonal * v`.
    pub fn off_diagonal_dot(&self, v: &VectorBte) -> Result<VectorBte, BteError> {
        let full = self.dot(v)?;
        let diag = self.diagonal()?;
        Ok(&full - &(diag * v))
    }

    /// Rescales the stored operator to `Omega_ij = A_ij / sqrt(N_i N_j)` and the
    /// linewidths to `A_ii / N_i`. Irreversible.
    #[tracing::instrument(name = "Omega conversion", level = "debug", skip_all)]
    pub fn a2_omega(&mut self) -> Result<(), BteError> {
        if !self.options.in_memory {
            return Err(BteError::RelaxonsRequireInMemory);
        }
        self.require("convert to omega", &[MatrixState::Assembled])?;
        let factors = &self.system.factors;
        let n = self.system.num_states();
        let sqrt_n: Vec<f64> = (0..n).map(|s| factors.get(0, s).max(0.0).sqrt()).collect();
        let matrix = self.matrix.as_mut().ok_or(BteError::MatrixState {
            operation: "convert to omega",
            state: "not in memory",
        })?;
        matrix.map_local(|i, j, a| {
            let d = sqrt_n[i] * sqrt_n[j];
            if d > 0.0 { a / d } else { 0.0 }
        });
        for (s, lw) in self.linewidths.iter_mut().enumerate() {
            let factor = factors.get(0, s);
            *lw = if factor > 0.0 { *lw / factor } else { 0.0 };
        }
        self.diagonal = OnceLock::new();
        self.state = MatrixState::Omega;
        Ok(())
    }

    /// Hands the `Omega` matrix to the eigensolver; ascending eigenvalues and
    /// eigenvectors in the matrix's storage mode. The matrix is consumed.
    #[tracing::instrument(name = "Relaxon diagonalization", level = "info", skip_all)]
    pub fn diagonalize(&mut self) -> Result<(Vec<f64>, DistributedMatrix<'a, f64>), BteError> {
        self.require("diagonalize", &[MatrixState::Omega])?;
        let matrix = self.matrix.take().ok_or(BteError::MatrixState {
            operation: "diagonalize",
            state: self.state.name(),
        })?;
        self.state = MatrixState::Diagonalized;
        self.diagonal = OnceLock::new();
        let result = matrix.diagonalize()?;
        if self.comm.is_head() {
            info!(num_eigenvalues = result.0.len(), "relaxons computed");
        }
        Ok(result)
    }

    /// `tau = N / A_ii`, or `1 / Omega_ii` in the omega form.
    ///
    /// A state with `N > 0` whose rate is non-positive or non-finite gets a
    /// zero time and is listed in [`SingleModeTimes::degenerate`].
    pub fn single_mode_times(&self) -> Result<SingleModeTimes, BteError> {
        self.require(
            "compute single-mode times from",
            &[MatrixState::Assembled, MatrixState::Omega],
        )?;
        let diag = self.diagonal()?;
        let omega = self.state == MatrixState::Omega;
        let (num_calcs, n) = (self.num_calcs(), self.num_states());
        let mut times = VectorBte::zeros(num_calcs, n);
        let mut degenerate = Vec::new();
        for c in 0..num_calcs {
            for s in 0..n {
                let factor = self.system.factors.get(c, s);
                if factor <= 0.0 {
                    continue;
                }
                let rate = diag.get(c, 0, s);
                if rate <= 0.0 || !rate.is_finite() {
                    degenerate.push((c, s));
                    continue;
                }
                let tau = if omega { 1.0 / rate } else { factor / rate };
                for d in 0..DIMENSIONS {
                    times.set(c, d, s, tau);
                }
            }
        }
        if !degenerate.is_empty() && self.comm.is_head() {
            warn!(
                count = degenerate.len(),
                "states with a vanishing scattering rate are excluded from transport"
            );
        }
        Ok(SingleModeTimes { times, degenerate })
    }
}

/// Offset of `(i, j)`, `i < j`, in the row-major strict upper triangle of an `n x n` matrix.
fn packed_upper(n: usize, i: usize, j: usize) -> usize {
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

/// Each rank multiplies its work-division rows of the replicated matrix.
fn dot_local(comm: &dyn Comm, m: &DistributedMatrix<'_, f64>, vectors: &[&VectorBte], out: &mut [f64]) {
    let n = m.num_rows();
    let rows = comm.divide_work(n);
    if rows.is_empty() {
        return;
    }
    let block = DIMENSIONS * n;
    let x = Mat::from_fn(n, vectors.len() * DIMENSIONS, |j, col| {
        vectors[col / DIMENSIONS].get(0, col % DIMENSIONS, j)
    });
    let a = m.local().subrows(rows.start, rows.len());
    let y = f64::matmul(a, x.as_ref());
    for (r, i) in rows.enumerate() {
        for col in 0..y.ncols() {
            let (v, d) = (col / DIMENSIONS, col % DIMENSIONS);
            out[v * block + d * n + i] = y[(r, col)];
        }
    }
}

/// Local block times the owned slice of the vectors, scattered to global rows.
fn dot_block_cyclic(m: &DistributedMatrix<'_, f64>, vectors: &[&VectorBte], out: &mut [f64]) {
    let n = m.num_rows();
    let rows = m.owned_rows();
    let cols = m.owned_cols();
    if rows.is_empty() || cols.is_empty() {
        return;
    }
    let block = DIMENSIONS * n;
    let x = Mat::from_fn(cols.len(), vectors.len() * DIMENSIONS, |lj, col| {
        vectors[col / DIMENSIONS].get(0, col % DIMENSIONS, cols[lj])
    });
    let y = f64::matmul(m.local(), x.as_ref());
    for (li, &i) in rows.iter().enumerate() {
        for col in 0..y.ncols() {
            let (v, d) = (col / DIMENSIONS, col % DIMENSIONS);
            out[v * block + d * n + i] += y[(li, col)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bte::bandstructure::{FullBandStructure, Points};
    use crate::bte::coupling::TabulatedCoupling;
    use crate::bte::statistics::{Particle, StatisticsSweep};
    use crate::bte::statistics::CalcStatistics;
    use crate::parallel::SerialComm;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts the transition rates requested from the table.
    struct CountingCoupling {
        table: TabulatedCoupling,
        calls: AtomicUsize,
    }

    impl CouplingEvaluator for CountingCoupling {
        fn transition_rate(&self, calc: &CalcStatistics, i: usize, j: usize) -> f64 {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.table.transition_rate(calc, i, j)
        }
    }

    fn bands(n: usize) -> FullBandStructure {
        let crystal = (0..n).map(|k| [k as f64 / n as f64, 0.0, 0.0]).collect();
        let energies = (0..n).map(|s| 0.5 + 0.25 * s as f64).collect();
        let velocities = (0..n)
            .flat_map(|s| [(s as f64 - 2.0) * 0.3, 0.1 * s as f64, 1.0])
            .collect();
        FullBandStructure::from_parts(
            Particle::Phonon,
            Points::from_crystal(crystal, [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]),
            1,
            2.0,
            energies,
            velocities,
        )
        .unwrap()
    }

    fn coupling(n: usize) -> TabulatedCoupling {
        TabulatedCoupling::from_upper(n, |i, j| 0.05 + 0.01 * ((i * 7 + j * 3) % 5) as f64)
    }

    fn sample_vector(num_calcs: usize, n: usize) -> VectorBte {
        VectorBte::from_fn(num_calcs, n, |c, d, s| ((c + 1) * (d + 2) + s) as f64 * 0.1 - 0.3)
    }

    #[test]
    fn state_machine_guards() {
        let b = bands(4);
        let sweep = StatisticsSweep::from_temperatures(&[1.0]);
        let system = TransportSystem::new(&sweep, &b);
        let c = coupling(4);
        let mut sm = ScatteringMatrix::new(&SerialComm, MatrixOptions::default(), &system, &c).unwrap();
        assert!(matches!(sm.dot(&sample_vector(1, 4)), Err(BteError::MatrixState { .. })));
        sm.setup().unwrap();
        assert!(matches!(sm.setup(), Err(BteError::MatrixState { .. })));
        assert!(matches!(sm.diagonalize(), Err(BteError::MatrixState { .. })));
        sm.a2_omega().unwrap();
        assert!(matches!(sm.a2_omega(), Err(BteError::MatrixState { .. })));
        sm.diagonalize().unwrap();
        assert_eq!(sm.state(), MatrixState::Diagonalized);
        assert!(matches!(sm.dot(&sample_vector(1, 4)), Err(BteError::MatrixState { .. })));
        assert!(matches!(sm.diagonal(), Err(BteError::MatrixState { .. })));
        assert!(matches!(sm.single_mode_times(), Err(BteError::MatrixState { .. })));
    }

    #[test]
    fn in_memory_requires_single_calculation() {
        let b = bands(3);
        let sweep = StatisticsSweep::from_temperatures(&[1.0, 2.0]);
        let system = TransportSystem::new(&sweep, &b);
        let c = coupling(3);
        let r = ScatteringMatrix::new(&SerialComm, MatrixOptions::default(), &system, &c);
        assert!(matches!(r, Err(BteError::InMemoryMultipleCalculations { num_calcs: 2 })));
    }

    #[test]
    fn diagonal_is_positive_row_sum() {
        let n = 5;
        let b = bands(n);
        let sweep = StatisticsSweep::from_temperatures(&[0.8]);
        let system = TransportSystem::new(&sweep, &b);
        let c = coupling(n);
        let mut sm = ScatteringMatrix::new(&SerialComm, MatrixOptions::default(), &system, &c).unwrap();
        sm.setup().unwrap();
        let a = sm.matrix().unwrap().to_global().unwrap();
        let diag = sm.diagonal().unwrap();
        for i in 0..n {
            let off: f64 = (0..n).filter(|&j| j != i).map(|j| -a[(i, j)]).sum();
            assert!(diag.get(0, 0, i) > 0.0);
            assert_abs_diff_eq!(diag.get(0, 2, i), off, epsilon = 1e-14);
            assert_abs_diff_eq!(sm.linewidths(0)[i], off, epsilon = 1e-14);
            for j in 0..n {
                assert_eq!(a[(i, j)], a[(j, i)]);
            }
        }
    }

    #[test]
    fn off_diagonal_dot_removes_diagonal() {
        let n = 6;
        let b = bands(n);
        let sweep = StatisticsSweep::from_temperatures(&[1.2]);
        let system = TransportSystem::new(&sweep, &b);
        let c = coupling(n);
        let options = MatrixOptions { boundary_length: Some(10.0), ..Default::default() };
        let mut sm = ScatteringMatrix::new(&SerialComm, options, &system, &c).unwrap();
        sm.setup().unwrap();
        let v = sample_vector(1, n);
        let full = sm.dot(&v).unwrap();
        let off = sm.off_diagonal_dot(&v).unwrap();
        let diag = sm.diagonal().unwrap();
        for d in 0..DIMENSIONS {
            for s in 0..n {
                let expected = full.get(0, d, s) - diag.get(0, d, s) * v.get(0, d, s);
                assert_abs_diff_eq!(off.get(0, d, s), expected, epsilon = 1e-13);
            }
        }
    }

    #[test]
    fn batched_dot_matches_single() {
        let n = 7;
        let b = bands(n);
        let sweep = StatisticsSweep::from_temperatures(&[1.0]);
        let system = TransportSystem::new(&sweep, &b);
        let c = coupling(n);
        let mut sm = ScatteringMatrix::new(&SerialComm, MatrixOptions::default(), &system, &c).unwrap();
        sm.setup().unwrap();
        let v1 = sample_vector(1, n);
        let v2 = v1.map(|x| x * x - 0.1);
        let batched = sm.dot_many(&[&v1, &v2]).unwrap();
        let single = [sm.dot(&v1).unwrap(), sm.dot(&v2).unwrap()];
        for (x, y) in batched.iter().zip(&single) {
            for (a, b) in x.as_slice().iter().zip(y.as_slice()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-13);
            }
        }
    }

    #[test]
    fn symmetric_assembly_matches_full() {
        let n = 6;
        let b = bands(n);
        let sweep = StatisticsSweep::from_temperatures(&[1.0]);
        let system = TransportSystem::new(&sweep, &b);
        let c = coupling(n);
        let mut full = ScatteringMatrix::new(&SerialComm, MatrixOptions::default(), &system, &c).unwrap();
        full.setup().unwrap();
        let options = MatrixOptions { use_symmetries: true, ..Default::default() };
        let mut sym = ScatteringMatrix::new(&SerialComm, options, &system, &c).unwrap();
        sym.setup().unwrap();
        let (a, s) = (
            full.matrix().unwrap().to_global().unwrap(),
            sym.matrix().unwrap().to_global().unwrap(),
        );
        for i in 0..n {
            for j in 0..n {
                assert_abs_diff_eq!(a[(i, j)], s[(i, j)], epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn on_the_fly_matches_in_memory() {
        let n = 5;
        let b = bands(n);
        let sweep = StatisticsSweep::from_temperatures(&[1.0]);
        let system = TransportSystem::new(&sweep, &b);
        let c = coupling(n);
        let options = MatrixOptions { boundary_length: Some(3.0), ..Default::default() };
        let mut stored = ScatteringMatrix::new(&SerialComm, options, &system, &c).unwrap();
        stored.setup().unwrap();
        let lazy_options = MatrixOptions { in_memory: false, ..options };
        let mut lazy = ScatteringMatrix::new(&SerialComm, lazy_options, &system, &c).unwrap();
        lazy.setup().unwrap();

        let v = sample_vector(1, n);
        let x = stored.dot(&v).unwrap();
        let y = lazy.dot(&v).unwrap();
        for (a, b) in x.as_slice().iter().zip(y.as_slice()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-13);
        }
        assert!(matches!(lazy.a2_omega(), Err(BteError::RelaxonsRequireInMemory)));
    }

    #[test]
    fn omega_times_equal_a_times() {
        let n = 4;
        let b = bands(n);
        let sweep = StatisticsSweep::from_temperatures(&[1.0]);
        let system = TransportSystem::new(&sweep, &b);
        let c = coupling(n);
        let mut sm = ScatteringMatrix::new(&SerialComm, MatrixOptions::default(), &system, &c).unwrap();
        sm.setup().unwrap();
        let before = sm.single_mode_times().unwrap();
        sm.a2_omega().unwrap();
        let after = sm.single_mode_times().unwrap();
        assert!(before.degenerate.is_empty());
        for s in 0..n {
            assert_abs_diff_eq!(
                before.times.get(0, 0, s),
                after.times.get(0, 0, s),
                epsilon = 1e-12 * before.times.get(0, 0, s)
            );
        }
    }

    #[test]
    fn decoupled_states_are_flagged() {
        let n = 3;
        let b = bands(n);
        let sweep = StatisticsSweep::from_temperatures(&[1.0]);
        let system = TransportSystem::new(&sweep, &b);
        let c = TabulatedCoupling::from_upper(n, |_, _| 0.0);
        let mut sm = ScatteringMatrix::new(&SerialComm, MatrixOptions::default(), &system, &c).unwrap();
        sm.setup().unwrap();
        let times = sm.single_mode_times().unwrap();
        assert_eq!(times.degenerate, vec![(0, 0), (0, 1), (0, 2)]);
        assert!(times.times.as_slice().iter().all(|&t| t == 0.0));
    }

    #[test]
    fn symmetric_assembly_evaluates_each_pair_once() {
        let n = 10;
        let b = bands(n);
        let sweep = StatisticsSweep::from_temperatures(&[1.0]);
        let system = TransportSystem::new(&sweep, &b);
        let reference = {
            let c = coupling(n);
            let mut sm =
                ScatteringMatrix::new(&SerialComm, MatrixOptions::default(), &system, &c).unwrap();
            sm.setup().unwrap();
            sm.matrix().unwrap().to_global().unwrap()
        };

        for (block_size, use_symmetries, expected_calls) in [
            (None, false, n * (n - 1)),
            (None, true, n * (n - 1) / 2),
            (Some(3), false, n * (n - 1)),
            (Some(3), true, n * (n - 1) / 2),
        ] {
            let c = CountingCoupling { table: coupling(n), calls: AtomicUsize::new(0) };
            let options = MatrixOptions { block_size, use_symmetries, ..Default::default() };
            let mut sm = ScatteringMatrix::new(&SerialComm, options, &system, &c).unwrap();
            sm.setup().unwrap();
            assert_eq!(
                c.calls.load(Ordering::Relaxed),
                expected_calls,
                "{block_size:?}, symmetries {use_symmetries}"
            );
            let a = sm.matrix().unwrap().to_global().unwrap();
            for i in 0..n {
                for j in 0..n {
                    assert_abs_diff_eq!(a[(i, j)], reference[(i, j)], epsilon = 1e-14);
                }
            }
        }
    }

    #[test]
    fn packed_upper_offsets_are_dense() {
        let n = 6;
        let offsets: Vec<usize> =
            (0..n).flat_map(|i| (i + 1..n).map(move |j| packed_upper(n, i, j))).collect();
        assert_eq!(offsets, (0..n * (n - 1) / 2).collect::<Vec<_>>());
    }
}
