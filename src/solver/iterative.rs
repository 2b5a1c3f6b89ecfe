//! Omini-Sparavigna iteration: `f_{n+1} = f_RTA - D^-1 (A - D) f_n`.

use crate::bte::observables::ThermalConductivity;
use crate::error::BteError;
use crate::scattering::ScatteringMatrix;
use crate::solver::{BteSolver, RtaSolution, SolverKind, TransportResult};
use crate::utils::convergence::Convergence;
use tracing::{debug, info};

pub struct IterativeSolver {
    pub conv: Convergence,
}

impl IterativeSolver {
    pub fn new(threshold: f64, max_iterations: usize) -> Self {
        Self { conv: Convergence::new(threshold, max_iterations) }
    }
}

impl BteSolver for IterativeSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Iterative
    }

    #[tracing::instrument(name = "Iterative BTE", level = "info", skip_all)]
    fn solve(
        &self,
        matrix: &mut ScatteringMatrix<'_>,
        rta: &RtaSolution,
    ) -> Result<TransportResult, BteError> {
        let system = matrix.system();
        let head = matrix.comm().is_head();
        let inverse_diagonal = matrix.diagonal()?.reciprocal_or_zero();
        let f_rta = &rta.canonical;

        let mut f = f_rta.clone();
        let mut kappa = rta.conductivity.clone();
        let mut changes = vec![f64::INFINITY; system.num_calcs()];
        for i in 1..=self.conv.max_iterations {
            let scattered = matrix.off_diagonal_dot(&f)?;
            f = f_rta - &(&scattered * &inverse_diagonal);
            let next = ThermalConductivity::from_canonical_population(system, &f);
            changes = next.relative_change(&kappa);
            kappa = next;
            if head {
                debug!(iteration = i, ?changes, "iterative step");
            }
            let (stop, stats) = self.conv.check(&changes, i);
            if stop && stats.converged {
                if head {
                    info!(iterations = i, kappa = ?kappa.tensors(), "iterative solver converged");
                }
                return Ok(TransportResult {
                    kind: SolverKind::Iterative,
                    conductivity: kappa,
                    viscosity: None,
                    relaxation_times: None,
                    stats,
                });
            }
        }
        Err(BteError::NotConverged {
            solver: SolverKind::Iterative.name(),
            iterations: self.conv.max_iterations,
            unconverged: self.conv.unconverged(&changes),
        })
    }
}
