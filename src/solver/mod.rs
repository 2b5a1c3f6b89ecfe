//! BTE solver drivers.
//!
//! RTA always runs first; the other solvers refine its population.

use crate::bte::observables::{ThermalConductivity, Viscosity};
use crate::error::BteError;
use crate::scattering::ScatteringMatrix;
use crate::utils::convergence::SolveStats;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolverKind {
    /// Relaxation-time approximation
    Rta,
    /// Omini-Sparavigna fixed-point iteration
    Iterative,
    /// Preconditioned conjugate gradient on the variational functional
    Variational,
    /// Eigendecomposition of the symmetrized scattering matrix
    Relaxons,
}

impl SolverKind {
    pub fn name(self) -> &'static str {
        match self {
            SolverKind::Rta => "rta",
            SolverKind::Iterative => "iterative",
            SolverKind::Variational => "variational",
            SolverKind::Relaxons => "relaxons",
        }
    }
}

/// Output of one solver.
#[derive(Debug, Clone, Serialize)]
pub struct TransportResult {
    pub kind: SolverKind,
    pub conductivity: ThermalConductivity,
    pub viscosity: Option<Viscosity>,
    /// Single-mode times (`[calc][state]`) for RTA, relaxon lifetimes for relaxons.
    pub relaxation_times: Option<Vec<f64>>,
    pub stats: SolveStats,
}

/// Common interface of the BTE solvers.
pub trait BteSolver {
    fn kind(&self) -> SolverKind;

    /// Solves the BTE on an assembled matrix, starting from the RTA solution.
    fn solve(
        &self,
        matrix: &mut ScatteringMatrix<'_>,
        rta: &RtaSolution,
    ) -> Result<TransportResult, BteError>;
}

pub mod iterative;
pub mod relaxons;
pub mod rta;
pub mod variational;

pub use iterative::IterativeSolver;
pub use relaxons::RelaxonsSolver;
pub use rta::{RtaSolution, RtaSolver};
pub use variational::VariationalSolver;
