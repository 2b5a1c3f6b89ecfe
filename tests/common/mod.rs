//! Small phonon models shared by the integration tests.

#![allow(dead_code)]

use relaxon::bte::{FullBandStructure, Particle, Points, TabulatedCoupling};
use std::f64::consts::{PI, TAU};

pub fn reciprocal_lattice() -> [[f64; 3]; 3] {
    [[TAU, 0.0, 0.0], [0.0, TAU, 0.0], [0.0, 0.0, TAU]]
}

/// A 1D mesh with `num_bands` dispersive branches, all at positive energy and
/// with a non-zero group velocity.
pub fn chain_bands(num_points: usize, num_bands: usize) -> FullBandStructure {
    chain(Particle::Phonon, num_points, num_bands)
}

/// The same branches filled with electrons; energies span roughly 0.4 to 1.1.
pub fn chain_electrons(num_points: usize, num_bands: usize) -> FullBandStructure {
    chain(Particle::Electron, num_points, num_bands)
}

fn chain(particle: Particle, num_points: usize, num_bands: usize) -> FullBandStructure {
    let mut energies = Vec::new();
    let mut velocities = Vec::new();
    for ik in 0..num_points {
        let x = ik as f64 / num_points as f64;
        for ib in 0..num_bands {
            energies.push(0.4 + 0.3 * ib as f64 + 0.2 * (PI * x).sin().powi(2));
            velocities.extend_from_slice(&[
                (TAU * x + ib as f64).cos(),
                0.5 * (TAU * x).sin(),
                0.2 + 0.1 * ib as f64,
            ]);
        }
    }
    FullBandStructure::from_parts(
        particle,
        Points::from_mesh([num_points, 1, 1], reciprocal_lattice()),
        num_bands,
        1.5,
        energies,
        velocities,
    )
    .unwrap()
}

pub fn weak_coupling(num_states: usize) -> TabulatedCoupling {
    TabulatedCoupling::from_upper(num_states, |i, j| 0.02 + 0.01 * ((i * 5 + j * 3) % 7) as f64)
}

/// Energy at which `n(n+1) = 1` for a Bose-Einstein population: `2 ln(phi) T`.
pub fn unit_factor_energy(temperature: f64) -> f64 {
    let phi = (1.0 + 5f64.sqrt()) / 2.0;
    2.0 * phi.ln() * temperature
}

/// Two states at the unit-factor energy moving in opposite directions along x.
pub fn two_state_bands(temperature: f64) -> FullBandStructure {
    let e = unit_factor_energy(temperature);
    FullBandStructure::from_parts(
        Particle::Phonon,
        Points::from_mesh([2, 1, 1], reciprocal_lattice()),
        1,
        1.0,
        vec![e, e],
        vec![1.0, 0.0, 0.0, -1.0, 0.0, 0.0],
    )
    .unwrap()
}

pub fn max_relative_error(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    let scale = a.iter().chain(b).fold(0.0f64, |m, x| m.max(x.abs())).max(f64::MIN_POSITIVE);
    a.iter().zip(b).fold(0.0f64, |m, (x, y)| m.max((x - y).abs())) / scale
}

pub fn flatten(t: &[[f64; 3]; 3]) -> Vec<f64> {
    t.iter().flatten().copied().collect()
}
