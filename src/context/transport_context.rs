//! Driver of a transport run.
//!
//! `TransportContext` checks the run preconditions, assembles the scattering
//! matrix, runs RTA and then every requested solver in the order iterative,
//! variational, relaxons. Relaxons run last since they consume the matrix.

use crate::bte::system::TransportSystem;
use crate::config::{SolverSet, TransportOptions};
use crate::core::traits::CouplingEvaluator;
use crate::error::BteError;
use crate::parallel::{Comm, ProcessGrid};
use crate::scattering::ScatteringMatrix;
use crate::solver::{
    BteSolver, IterativeSolver, RelaxonsSolver, RtaSolution, RtaSolver, TransportResult,
    VariationalSolver,
};
use serde::Serialize;
use tracing::info;

/// Everything a run produces.
#[derive(Debug, Clone, Serialize)]
pub struct TransportReport {
    pub rta: RtaSolution,
    /// RTA first, then one entry per requested solver.
    pub results: Vec<TransportResult>,
}

pub struct TransportContext<'a> {
    comm: &'a dyn Comm,
    options: TransportOptions,
    solvers: SolverSet,
}

impl<'a> TransportContext<'a> {
    pub fn new(comm: &'a dyn Comm, options: TransportOptions) -> Result<Self, BteError> {
        let solvers = options.solver_set()?;
        Ok(Self { comm, options, solvers })
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub fn solvers(&self) -> SolverSet {
        self.solvers
    }

    /// Rejects inconsistent runs before any coupling is evaluated.
    pub fn validate(&self, system: &TransportSystem<'_>) -> Result<(), BteError> {
        let in_memory = self.options.scattering_matrix_in_memory;
        if self.solvers.contains(SolverSet::RELAXONS) && !in_memory {
            return Err(BteError::RelaxonsRequireInMemory);
        }
        if in_memory && system.num_calcs() != 1 {
            return Err(BteError::InMemoryMultipleCalculations { num_calcs: system.num_calcs() });
        }
        if self.options.block_size.is_some() {
            ProcessGrid::for_comm(self.comm)?;
        }
        Ok(())
    }

    fn requested_solvers(&self) -> Vec<Box<dyn BteSolver>> {
        let conv = self.options.convergence();
        let mut solvers: Vec<Box<dyn BteSolver>> = Vec::new();
        if self.solvers.contains(SolverSet::ITERATIVE) {
            solvers.push(Box::new(IterativeSolver { conv }));
        }
        if self.solvers.contains(SolverSet::VARIATIONAL) {
            solvers.push(Box::new(VariationalSolver { conv }));
        }
        if self.solvers.contains(SolverSet::RELAXONS) {
            solvers.push(Box::new(RelaxonsSolver::new()));
        }
        solvers
    }

    /// Runs the whole pipeline. Collective over `comm`.
    #[tracing::instrument(name = "Transport", level = "info", skip_all)]
    pub fn run(
        &self,
        system: &TransportSystem<'_>,
        coupling: &dyn CouplingEvaluator,
    ) -> Result<TransportReport, BteError> {
        self.validate(system)?;
        if self.comm.is_head() {
            info!(
                num_states = system.num_states(),
                num_calcs = system.num_calcs(),
                processes = self.comm.size(),
                solvers = ?self.solvers,
                "starting transport run"
            );
        }

        let mut matrix =
            ScatteringMatrix::new(self.comm, self.options.matrix_options(), system, coupling)?;
        matrix.setup()?;

        let rta_solver = RtaSolver::new();
        let rta = rta_solver.compute(&matrix)?;
        let mut results = vec![rta_solver.solve(&mut matrix, &rta)?];
        for solver in self.requested_solvers() {
            let result = solver.solve(&mut matrix, &rta)?;
            if self.comm.is_head() {
                info!(solver = solver.kind().name(), iterations = result.stats.iterations, "solver done");
            }
            results.push(result);
        }
        Ok(TransportReport { rta, results })
    }
}
