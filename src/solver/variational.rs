//! Variational solver: conjugate gradient on the Jacobi-preconditioned operator
//! `A~ = D^-1/2 A D^-1/2`, with `x~ = D^1/2 f` and `b~ = D^1/2 f_RTA`.
//!
//! The recurrence follows the classic CG of Saad §6.7 with residual `g`,
//! direction `h` and `t = A~ h`; step sizes are taken per (calculation,
//! direction). Conductivity is evaluated with the variational functional.

use crate::bte::observables::ThermalConductivity;
use crate::error::BteError;
use crate::scattering::ScatteringMatrix;
use crate::solver::{BteSolver, RtaSolution, SolverKind, TransportResult};
use crate::utils::convergence::Convergence;
use faer::Mat;
use tracing::{debug, info};

pub struct VariationalSolver {
    pub conv: Convergence,
}

impl VariationalSolver {
    pub fn new(threshold: f64, max_iterations: usize) -> Self {
        Self { conv: Convergence::new(threshold, max_iterations) }
    }
}

/// Elementwise `num / den`, zero where the denominator vanishes.
fn ratio(num: &Mat<f64>, den: &Mat<f64>) -> Mat<f64> {
    Mat::from_fn(num.nrows(), num.ncols(), |i, j| {
        let d = den[(i, j)];
        if d != 0.0 { num[(i, j)] / d } else { 0.0 }
    })
}

impl BteSolver for VariationalSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Variational
    }

    #[tracing::instrument(name = "Variational BTE", level = "info", skip_all)]
    fn solve(
        &self,
        matrix: &mut ScatteringMatrix<'_>,
        rta: &RtaSolution,
    ) -> Result<TransportResult, BteError> {
        let system = matrix.system();
        let head = matrix.comm().is_head();
        let sqrt_diagonal = matrix.diagonal()?.sqrt();
        let inv_sqrt_diagonal = sqrt_diagonal.reciprocal_or_zero();

        let b = &rta.canonical * &sqrt_diagonal;
        let mut x = b.clone();
        let af = matrix.dot(&rta.canonical)?;
        let mut kappa = ThermalConductivity::variational(system, &rta.canonical, &af, &rta.drift);

        let mut g = &(&af * &inv_sqrt_diagonal) - &b;
        let mut h = -&g;
        let mut t = &matrix.dot(&(&h * &inv_sqrt_diagonal))? * &inv_sqrt_diagonal;

        let mut changes = vec![f64::INFINITY; system.num_calcs()];
        for i in 1..=self.conv.max_iterations {
            let alpha = ratio(&g.dot(&h), &h.dot(&t));
            let x_next = &x - &h.scale_by(&alpha);
            let g_next = &g - &t.scale_by(&alpha);
            let beta = ratio(&g_next.dot(&g_next), &g.dot(&g));
            let h_next = &(-&g_next) + &h.scale_by(&beta);

            let f = &x_next * &inv_sqrt_diagonal;
            let products = matrix.dot_many(&[&f, &(&h_next * &inv_sqrt_diagonal)])?;
            let next = ThermalConductivity::variational(system, &f, &products[0], &rta.drift);
            changes = next.relative_change(&kappa);

            x = x_next;
            g = g_next;
            h = h_next;
            t = &products[1] * &inv_sqrt_diagonal;
            kappa = next;
            if head {
                debug!(iteration = i, ?changes, "variational step");
            }

            let (stop, stats) = self.conv.check(&changes, i);
            if stop && stats.converged {
                if head {
                    info!(iterations = i, kappa = ?kappa.tensors(), "variational solver converged");
                }
                return Ok(TransportResult {
                    kind: SolverKind::Variational,
                    conductivity: kappa,
                    viscosity: None,
                    relaxation_times: None,
                    stats,
                });
            }
        }
        Err(BteError::NotConverged {
            solver: SolverKind::Variational.name(),
            iterations: self.conv.max_iterations,
            unconverged: self.conv.unconverged(&changes),
        })
    }
}
