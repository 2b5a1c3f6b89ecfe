//! Driving term of the linearized BTE under a temperature gradient.

use crate::bte::system::TransportSystem;
use crate::bte::vector::VectorBte;

/// Canonical bulk drift `b_s = N_s (E_s - mu) v_s / T^2`.
///
/// Inactive states carry a zero drift.
pub fn bulk_drift(system: &TransportSystem<'_>) -> VectorBte {
    let bands = system.bands;
    VectorBte::from_fn(system.num_calcs(), system.num_states(), |c, d, s| {
        let calc = system.calc(c);
        let n = system.factors.get(c, s);
        if n <= 0.0 {
            return 0.0;
        }
        let t = calc.temperature;
        n * (bands.energy(s) - calc.chemical_potential) * bands.group_velocity(s)[d] / (t * t)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bte::bandstructure::{FullBandStructure, Points};
    use crate::bte::statistics::{Particle, StatisticsSweep};
    use approx::assert_relative_eq;

    #[test]
    fn drift_follows_velocity() {
        let bands = FullBandStructure::from_parts(
            Particle::Phonon,
            Points::from_crystal(vec![[0.0; 3], [0.5, 0.0, 0.0]], [[1.0, 0.0, 0.0]; 3]),
            1,
            1.0,
            vec![1.0, 2.0],
            vec![1.0, 0.0, -2.0, 3.0, 0.0, 0.0],
        )
        .unwrap();
        let sweep = StatisticsSweep::from_temperatures(&[2.0]);
        let system = TransportSystem::new(&sweep, &bands);
        let b = bulk_drift(&system);
        let n0 = system.factors.get(0, 0);
        assert_relative_eq!(b.get(0, 0, 0), n0 * 1.0 / 4.0, max_relative = 1e-14);
        assert_relative_eq!(b.get(0, 2, 0), -2.0 * n0 / 4.0, max_relative = 1e-14);
        assert_eq!(b.get(0, 1, 1), 0.0);
    }
}
