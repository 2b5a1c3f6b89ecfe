//! Equilibrium statistics of the quasiparticles and the temperature /
//! chemical-potential sweep.
//!
//! Energies, temperatures and chemical potentials share one energy unit
//! (k_B = 1).

use crate::core::traits::BandStructure;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Particle {
    /// Bose-Einstein statistics.
    Phonon,
    /// Fermi-Dirac statistics.
    Electron,
}

impl Particle {
    pub fn population(&self, energy: f64, temperature: f64, chemical_potential: f64) -> f64 {
        let x = (energy - chemical_potential) / temperature;
        match self {
            Particle::Phonon => {
                if x <= 0.0 {
                    0.0
                } else {
                    1.0 / x.exp_m1()
                }
            }
            Particle::Electron => {
                if x > 0.0 {
                    let e = (-x).exp();
                    e / (1.0 + e)
                } else {
                    1.0 / (1.0 + x.exp())
                }
            }
        }
    }

    /// `n(n+1)` for bosons, `f(1-f)` for fermions.
    ///
    /// Zero marks a state that does not take part in transport (e.g. phonons
    /// at or below zero energy).
    pub fn pop_pop_pm1(&self, energy: f64, temperature: f64, chemical_potential: f64) -> f64 {
        let n = self.population(energy, temperature, chemical_potential);
        match self {
            Particle::Phonon => n * (n + 1.0),
            Particle::Electron => n * (1.0 - n),
        }
    }

    /// Derivative of the population with respect to temperature.
    pub fn dn_dt(&self, energy: f64, temperature: f64, chemical_potential: f64) -> f64 {
        self.pop_pop_pm1(energy, temperature, chemical_potential) * (energy - chemical_potential)
            / (temperature * temperature)
    }
}

/// One (temperature, chemical potential) point of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalcStatistics {
    pub temperature: f64,
    pub chemical_potential: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSweep {
    calcs: Vec<CalcStatistics>,
}

impl StatisticsSweep {
    pub fn new(calcs: Vec<CalcStatistics>) -> Self {
        Self { calcs }
    }

    /// Phonon-style sweep: the given temperatures at zero chemical potential.
    pub fn from_temperatures(temperatures: &[f64]) -> Self {
        Self::new(
            temperatures
                .iter()
                .map(|&temperature| CalcStatistics { temperature, chemical_potential: 0.0 })
                .collect(),
        )
    }

    pub fn num_calcs(&self) -> usize {
        self.calcs.len()
    }

    pub fn calc(&self, i: usize) -> &CalcStatistics {
        &self.calcs[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalcStatistics> {
        self.calcs.iter()
    }
}

/// Table of `N = pop_pop_pm1` per (calculation, state).
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationFactors {
    num_calcs: usize,
    num_states: usize,
    data: Vec<f64>,
}

impl PopulationFactors {
    pub fn new(sweep: &StatisticsSweep, bands: &dyn BandStructure) -> Self {
        let num_states = bands.num_states();
        let particle = bands.particle();
        let mut data = Vec::with_capacity(sweep.num_calcs() * num_states);
        for calc in sweep.iter() {
            for s in 0..num_states {
                data.push(particle.pop_pop_pm1(
                    bands.energy(s),
                    calc.temperature,
                    calc.chemical_potential,
                ));
            }
        }
        Self { num_calcs: sweep.num_calcs(), num_states, data }
    }

    pub fn num_calcs(&self) -> usize {
        self.num_calcs
    }
    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn get(&self, calc: usize, state: usize) -> f64 {
        self.data[calc * self.num_states + state]
    }

    pub fn is_active(&self, calc: usize, state: usize) -> bool {
        self.get(calc, state) > 0.0
    }
}
