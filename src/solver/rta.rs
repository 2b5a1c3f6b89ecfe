//! Relaxation-time approximation.

use crate::bte::drift::bulk_drift;
use crate::bte::observables::{SpecificHeat, ThermalConductivity, Viscosity};
use crate::bte::vector::VectorBte;
use crate::error::BteError;
use crate::scattering::{ScatteringMatrix, SingleModeTimes};
use crate::solver::{BteSolver, SolverKind, TransportResult};
use crate::utils::convergence::SolveStats;
use serde::Serialize;
use tracing::info;

/// RTA population and observables; the starting point of every other solver.
#[derive(Debug, Clone, Serialize)]
pub struct RtaSolution {
    pub drift: VectorBte,
    pub times: SingleModeTimes,
    /// `drift * tau`, the population deviation.
    pub population: VectorBte,
    /// `population / N`.
    pub canonical: VectorBte,
    pub conductivity: ThermalConductivity,
    pub viscosity: Viscosity,
    pub specific_heat: SpecificHeat,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RtaSolver;

impl RtaSolver {
    pub fn new() -> Self {
        Self
    }

    /// Extracts the single-mode times and evaluates the RTA observables.
    #[tracing::instrument(name = "RTA", level = "info", skip_all)]
    pub fn compute(&self, matrix: &ScatteringMatrix<'_>) -> Result<RtaSolution, BteError> {
        let system = matrix.system();
        let drift = bulk_drift(system);
        let times = matrix.single_mode_times()?;
        let population = &drift * &times.times;
        let canonical = population.population_to_canonical(&system.factors);
        let conductivity = ThermalConductivity::from_population(system, &population);
        let viscosity = Viscosity::rta(system, &times.times);
        let specific_heat = SpecificHeat::new(system);
        if matrix.comm().is_head() {
            for (c, k) in conductivity.tensors().iter().enumerate() {
                info!(calc = c, kappa = ?k, "RTA thermal conductivity");
            }
        }
        Ok(RtaSolution {
            drift,
            times,
            population,
            canonical,
            conductivity,
            viscosity,
            specific_heat,
        })
    }
}

impl BteSolver for RtaSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Rta
    }

    fn solve(
        &self,
        _matrix: &mut ScatteringMatrix<'_>,
        rta: &RtaSolution,
    ) -> Result<TransportResult, BteError> {
        let times = &rta.times.times;
        let relaxation_times = (0..times.num_calcs())
            .flat_map(|c| times.slice(c, 0).iter().copied())
            .collect();
        Ok(TransportResult {
            kind: SolverKind::Rta,
            conductivity: rta.conductivity.clone(),
            viscosity: Some(rta.viscosity.clone()),
            relaxation_times: Some(relaxation_times),
            stats: SolveStats::direct(),
        })
    }
}
