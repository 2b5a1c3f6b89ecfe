//! Exact solution through the eigenvectors ("relaxons") of
//! `Omega = N^-1/2 A N^-1/2`.

use crate::bte::observables::{Tensor2, Tensor4, ThermalConductivity, Viscosity};
use crate::bte::vector::DIMENSIONS;
use crate::core::traits::Op;
use crate::error::BteError;
use crate::matrix::DistributedMatrix;
use crate::scattering::ScatteringMatrix;
use crate::solver::{BteSolver, RtaSolution, SolverKind, TransportResult};
use crate::utils::convergence::SolveStats;
use faer::Mat;
use tracing::{info, warn};

/// Eigenvalues below this fraction of the largest one are treated as zero modes.
const ZERO_MODE_TOL: f64 = 1e-10;

#[derive(Debug, Default, Clone, Copy)]
pub struct RelaxonsSolver;

impl RelaxonsSolver {
    pub fn new() -> Self {
        Self
    }
}

/// `out[k, a] = sum_s V[s, k] w[s, a]`, replicated on every rank.
fn project_onto_modes(
    vectors: &DistributedMatrix<'_, f64>,
    weights: Mat<f64>,
) -> Result<Mat<f64>, BteError> {
    let w = DistributedMatrix::from_global(vectors.comm(), weights.as_ref(), vectors.block_size())?;
    vectors.prod(&w, Op::Trans, Op::NoTrans)?.to_global()
}

impl BteSolver for RelaxonsSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Relaxons
    }

    #[tracing::instrument(name = "Relaxons BTE", level = "info", skip_all)]
    fn solve(
        &self,
        matrix: &mut ScatteringMatrix<'_>,
        rta: &RtaSolution,
    ) -> Result<TransportResult, BteError> {
        if !matrix.is_in_memory() {
            return Err(BteError::RelaxonsRequireInMemory);
        }
        let system = matrix.system();
        if system.num_calcs() != 1 {
            return Err(BteError::InMemoryMultipleCalculations { num_calcs: system.num_calcs() });
        }
        let head = matrix.comm().is_head();
        let with_viscosity = !matrix.options().use_symmetries;

        matrix.a2_omega()?;
        let (eigenvalues, eigenvectors) = matrix.diagonalize()?;

        let n = system.num_states();
        let calc = system.calc(0);
        let t = calc.temperature;
        let bands = system.bands;
        let num_sources = if with_viscosity { DIMENSIONS + 9 } else { DIMENSIONS };

        // columns 0..3: N^-1/2 b; then N^1/2 q_i v_j / T
        let sources = Mat::from_fn(n, num_sources, |s, col| {
            let factor = system.factors.get(0, s);
            if factor <= 0.0 {
                return 0.0;
            }
            if col < DIMENSIONS {
                rta.drift.get(0, col, s) / factor.sqrt()
            } else {
                let (i, j) = ((col - DIMENSIONS) / 3, (col - DIMENSIONS) % 3);
                factor.sqrt() * bands.wavevector(s)[i] * bands.group_velocity(s)[j] / t
            }
        });
        let projections = project_onto_modes(&eigenvectors, sources)?;

        let largest = eigenvalues.iter().fold(0.0f64, |m, l| m.max(l.abs()));
        let cutoff = ZERO_MODE_TOL * largest;
        let norm = system.normalization();
        let mut kappa: Tensor2 = [[0.0; 3]; 3];
        let mut eta: Tensor4 = [[[[0.0; 3]; 3]; 3]; 3];
        let mut lifetimes = vec![0.0; eigenvalues.len()];
        let mut skipped = 0usize;
        for (k, &lambda) in eigenvalues.iter().enumerate() {
            if lambda <= cutoff {
                let weight: f64 = (0..DIMENSIONS).map(|a| projections[(k, a)].abs()).sum();
                if weight > ZERO_MODE_TOL * (1.0 + largest) {
                    skipped += 1;
                }
                continue;
            }
            lifetimes[k] = 1.0 / lambda;
            for (a, row) in kappa.iter_mut().enumerate() {
                for (b, kab) in row.iter_mut().enumerate() {
                    *kab += norm * t * t * projections[(k, a)] * projections[(k, b)] / lambda;
                }
            }
            if with_viscosity {
                let w = |i: usize, j: usize| projections[(k, DIMENSIONS + 3 * i + j)];
                for i in 0..3 {
                    for j in 0..3 {
                        for l in 0..3 {
                            for m in 0..3 {
                                eta[i][j][l][m] += norm * t * w(i, j) * w(l, m) / lambda;
                            }
                        }
                    }
                }
            }
        }
        if skipped > 0 && head {
            warn!(modes = skipped, "zero modes with a non-zero drift projection were skipped");
        }
        if head {
            info!(kappa = ?kappa, "relaxons thermal conductivity");
        }

        Ok(TransportResult {
            kind: SolverKind::Relaxons,
            conductivity: ThermalConductivity::from_tensors(vec![kappa]),
            viscosity: with_viscosity.then(|| Viscosity::from_tensors(vec![eta])),
            relaxation_times: Some(lifetimes),
            stats: SolveStats::direct(),
        })
    }
}
