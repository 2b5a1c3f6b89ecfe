//! Transport observables computed from a population or from relaxons.
//!
//! Every observable carries one tensor per calculation and is normalized by
//! [`TransportSystem::normalization`].

use crate::bte::system::TransportSystem;
use crate::bte::vector::{DIMENSIONS, VectorBte};
use serde::Serialize;

pub type Tensor2 = [[f64; 3]; 3];
pub type Tensor4 = [[[[f64; 3]; 3]; 3]; 3];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermalConductivity {
    tensors: Vec<Tensor2>,
}

impl ThermalConductivity {
    pub fn from_tensors(tensors: Vec<Tensor2>) -> Self {
        Self { tensors }
    }

    /// `kappa_ab = C T^2 <b^b | f^a>` for a canonical population `f`.
    pub fn from_canonical_population(system: &TransportSystem<'_>, f: &VectorBte) -> Self {
        let norm = system.normalization();
        let bands = system.bands;
        let tensors = (0..system.num_calcs())
            .map(|c| {
                let calc = system.calc(c);
                let mut k = [[0.0; 3]; 3];
                for s in 0..system.num_states() {
                    let n = system.factors.get(c, s);
                    if n <= 0.0 {
                        continue;
                    }
                    let weight = norm * n * (bands.energy(s) - calc.chemical_potential);
                    let v = bands.group_velocity(s);
                    for (a, row) in k.iter_mut().enumerate() {
                        let fa = f.get(c, a, s);
                        for (b, kab) in row.iter_mut().enumerate() {
                            *kab += weight * v[b] * fa;
                        }
                    }
                }
                k
            })
            .collect();
        Self { tensors }
    }

    /// Same as [`from_canonical_population`](Self::from_canonical_population)
    /// for a population deviation `dn = N f`.
    pub fn from_population(system: &TransportSystem<'_>, population: &VectorBte) -> Self {
        let f = population.population_to_canonical(&system.factors);
        Self::from_canonical_population(system, &f)
    }

    /// Variational estimate `C T^2 (2 <b|f> - <f|A f>)`, exact at the solution
    /// and bounded from above by it.
    pub fn variational(
        system: &TransportSystem<'_>,
        f: &VectorBte,
        af: &VectorBte,
        drift: &VectorBte,
    ) -> Self {
        let norm = system.normalization();
        let tensors = (0..system.num_calcs())
            .map(|c| {
                let t2 = system.calc(c).temperature.powi(2);
                let mut k = [[0.0; 3]; 3];
                for (a, row) in k.iter_mut().enumerate() {
                    let fa = f.slice(c, a);
                    for (b, kab) in row.iter_mut().enumerate() {
                        let sum: f64 = fa
                            .iter()
                            .zip(drift.slice(c, b))
                            .zip(af.slice(c, b))
                            .map(|((x, bb), ax)| x * (2.0 * bb - ax))
                            .sum();
                        *kab = norm * t2 * sum;
                    }
                }
                k
            })
            .collect();
        Self { tensors }
    }

    pub fn num_calcs(&self) -> usize {
        self.tensors.len()
    }

    pub fn tensor(&self, calc: usize) -> &Tensor2 {
        &self.tensors[calc]
    }

    pub fn tensors(&self) -> &[Tensor2] {
        &self.tensors
    }

    /// Per calculation, `max|k_new - k_old| / max|k_new|`; the absolute change
    /// when the new tensor vanishes.
    pub fn relative_change(&self, previous: &ThermalConductivity) -> Vec<f64> {
        assert_eq!(self.num_calcs(), previous.num_calcs(), "calculation count changed");
        self.tensors
            .iter()
            .zip(&previous.tensors)
            .map(|(new, old)| {
                let mut diff = 0.0f64;
                let mut scale = 0.0f64;
                for a in 0..DIMENSIONS {
                    for b in 0..DIMENSIONS {
                        diff = diff.max((new[a][b] - old[a][b]).abs());
                        scale = scale.max(new[a][b].abs());
                    }
                }
                if scale > 0.0 { diff / scale } else { diff }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Viscosity {
    tensors: Vec<Tensor4>,
}

impl Viscosity {
    pub fn from_tensors(tensors: Vec<Tensor4>) -> Self {
        Self { tensors }
    }

    /// `eta_ijkl = C/T sum_s N q_i v_j q_k v_l tau` from single-mode times
    /// (direction 0 of `times` is used).
    pub fn rta(system: &TransportSystem<'_>, times: &VectorBte) -> Self {
        let norm = system.normalization();
        let bands = system.bands;
        let tensors = (0..system.num_calcs())
            .map(|c| {
                let t = system.calc(c).temperature;
                let mut eta = [[[[0.0; 3]; 3]; 3]; 3];
                for s in 0..system.num_states() {
                    let n = system.factors.get(c, s);
                    let tau = times.get(c, 0, s);
                    if n <= 0.0 || tau == 0.0 {
                        continue;
                    }
                    let q = bands.wavevector(s);
                    let v = bands.group_velocity(s);
                    let w = norm * n * tau / t;
                    for i in 0..3 {
                        for j in 0..3 {
                            for k in 0..3 {
                                for l in 0..3 {
                                    eta[i][j][k][l] += w * q[i] * v[j] * q[k] * v[l];
                                }
                            }
                        }
                    }
                }
                eta
            })
            .collect();
        Self { tensors }
    }

    pub fn tensor(&self, calc: usize) -> &Tensor4 {
        &self.tensors[calc]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecificHeat {
    values: Vec<f64>,
}

impl SpecificHeat {
    /// `C_v = C sum_s (E - mu) dn/dT = C sum_s N (E - mu)^2 / T^2` per calculation.
    pub fn new(system: &TransportSystem<'_>) -> Self {
        let norm = system.normalization();
        let particle = system.particle();
        let values = (0..system.num_calcs())
            .map(|c| {
                let calc = system.calc(c);
                (0..system.num_states())
                    .map(|s| {
                        let e = system.bands.energy(s);
                        (e - calc.chemical_potential)
                            * particle.dn_dt(e, calc.temperature, calc.chemical_potential)
                    })
                    .sum::<f64>()
                    * norm
            })
            .collect();
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}
