//! The transport problem: band structure, sweep and the derived population factors.

use crate::bte::statistics::{CalcStatistics, Particle, PopulationFactors, StatisticsSweep};
use crate::core::traits::BandStructure;

/// Borrowed view of everything a scattering matrix and its solvers need to
/// know about the states.
pub struct TransportSystem<'a> {
    pub sweep: &'a StatisticsSweep,
    pub bands: &'a dyn BandStructure,
    pub factors: PopulationFactors,
}

impl<'a> TransportSystem<'a> {
    pub fn new(sweep: &'a StatisticsSweep, bands: &'a dyn BandStructure) -> Self {
        let factors = PopulationFactors::new(sweep, bands);
        Self { sweep, bands, factors }
    }

    pub fn num_calcs(&self) -> usize {
        self.sweep.num_calcs()
    }

    pub fn num_states(&self) -> usize {
        self.bands.num_states()
    }

    pub fn particle(&self) -> Particle {
        self.bands.particle()
    }

    pub fn calc(&self, i: usize) -> &CalcStatistics {
        self.sweep.calc(i)
    }

    /// `1 / (num_points * volume)`, the Brillouin-zone normalization of every observable.
    pub fn normalization(&self) -> f64 {
        1.0 / (self.bands.num_points() as f64 * self.bands.volume())
    }
}
