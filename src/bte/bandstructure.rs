//! Wavevector meshes and a band structure stored in contiguous buffers.
//!
//! Per-point data is exposed through [`PointView`], an offset into the owned
//! buffers rather than a pointer into them.

use crate::bte::statistics::Particle;
use crate::core::traits::{BandStructure, HarmonicHamiltonian};
use crate::error::BteError;
use crate::parallel::{Comm, map_range};
use tracing::{debug, info};

/// List of wavevectors in crystal coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Points {
    /// Rows are the reciprocal lattice vectors.
    reciprocal_lattice: [[f64; 3]; 3],
    crystal: Vec<[f64; 3]>,
}

impl Points {
    /// Unshifted Monkhorst-Pack mesh, first index slowest.
    pub fn from_mesh(mesh: [usize; 3], reciprocal_lattice: [[f64; 3]; 3]) -> Self {
        let mut crystal = Vec::with_capacity(mesh.iter().product());
        for i in 0..mesh[0] {
            for j in 0..mesh[1] {
                for k in 0..mesh[2] {
                    crystal.push([
                        i as f64 / mesh[0] as f64,
                        j as f64 / mesh[1] as f64,
                        k as f64 / mesh[2] as f64,
                    ]);
                }
            }
        }
        Self { reciprocal_lattice, crystal }
    }

    pub fn from_crystal(crystal: Vec<[f64; 3]>, reciprocal_lattice: [[f64; 3]; 3]) -> Self {
        Self { reciprocal_lattice, crystal }
    }

    pub fn num_points(&self) -> usize {
        self.crystal.len()
    }

    pub fn crystal(&self, ik: usize) -> [f64; 3] {
        self.crystal[ik]
    }

    pub fn cartesian(&self, ik: usize) -> [f64; 3] {
        let c = self.crystal[ik];
        let b = &self.reciprocal_lattice;
        let mut out = [0.0; 3];
        for (d, o) in out.iter_mut().enumerate() {
            *o = c[0] * b[0][d] + c[1] * b[1][d] + c[2] * b[2][d];
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct FullBandStructure {
    particle: Particle,
    points: Points,
    num_bands: usize,
    volume: f64,
    /// `[ik][ib]`
    energies: Vec<f64>,
    /// `[ik][ib][direction]`
    velocities: Vec<f64>,
}

/// Read-only view of the bands at one wavevector.
#[derive(Debug, Clone, Copy)]
pub struct PointView<'a> {
    bands: &'a FullBandStructure,
    ik: usize,
}

impl PointView<'_> {
    pub fn index(&self) -> usize {
        self.ik
    }

    pub fn energies(&self) -> &[f64] {
        let nb = self.bands.num_bands;
        &self.bands.energies[self.ik * nb..(self.ik + 1) * nb]
    }

    pub fn velocity(&self, ib: usize) -> [f64; 3] {
        let at = (self.ik * self.bands.num_bands + ib) * 3;
        let v = &self.bands.velocities[at..at + 3];
        [v[0], v[1], v[2]]
    }

    pub fn wavevector(&self) -> [f64; 3] {
        self.bands.points.cartesian(self.ik)
    }
}

impl FullBandStructure {
    /// Builds the band structure from explicit buffers laid out as
    /// `energies[ik * num_bands + ib]` and `velocities[(ik * num_bands + ib) * 3 + d]`.
    pub fn from_parts(
        particle: Particle,
        points: Points,
        num_bands: usize,
        volume: f64,
        energies: Vec<f64>,
        velocities: Vec<f64>,
    ) -> Result<Self, BteError> {
        let num_states = points.num_points() * num_bands;
        if energies.len() != num_states || velocities.len() != 3 * num_states {
            return Err(BteError::DimensionMismatch(format!(
                "{} energies and {} velocity components for {} states",
                energies.len(),
                velocities.len(),
                num_states
            )));
        }
        Ok(Self { particle, points, num_bands, volume, energies, velocities })
    }

    /// Diagonalizes `h0` at every point of `points`.
    ///
    /// Points are split across ranks with the contiguous work division and the
    /// partial buffers are sum-reduced, so every rank ends with the full
    /// band structure.
    #[tracing::instrument(name = "band structure", level = "info", skip_all)]
    pub fn from_hamiltonian(
        comm: &dyn Comm,
        h0: &dyn HarmonicHamiltonian,
        points: Points,
        volume: f64,
        particle: Particle,
    ) -> Result<Self, BteError> {
        let num_bands = h0.num_bands();
        let num_points = points.num_points();
        let work = comm.divide_work(num_points);
        debug!(rank = comm.rank(), head = work.start, tail = work.end, "dividing wavevectors");

        let solved = map_range(work.clone(), |ik| h0.diagonalize(points.cartesian(ik)));

        let mut energies = vec![0.0; num_points * num_bands];
        let mut velocities = vec![0.0; num_points * num_bands * 3];
        for (ik, eig) in work.zip(solved) {
            let eig = eig?;
            if eig.energies.len() != num_bands {
                return Err(BteError::DimensionMismatch(format!(
                    "hamiltonian returned {} energies for {} bands",
                    eig.energies.len(),
                    num_bands
                )));
            }
            energies[ik * num_bands..(ik + 1) * num_bands].copy_from_slice(&eig.energies);
            if let Some(vel) = eig.velocities {
                for (ib, v) in vel.iter().enumerate().take(num_bands) {
                    let at = (ik * num_bands + ib) * 3;
                    velocities[at..at + 3].copy_from_slice(v);
                }
            }
        }
        comm.all_reduce_sum(&mut energies)?;
        comm.all_reduce_sum(&mut velocities)?;

        if comm.is_head() {
            info!(num_points, num_bands, "band structure done");
        }
        Ok(Self { particle, points, num_bands, volume, energies, velocities })
    }

    pub fn points(&self) -> &Points {
        &self.points
    }

    pub fn point(&self, ik: usize) -> PointView<'_> {
        assert!(ik < self.points.num_points(), "point {ik} out of range");
        PointView { bands: self, ik }
    }
}

impl BandStructure for FullBandStructure {
    fn particle(&self) -> Particle {
        self.particle
    }
    fn num_points(&self) -> usize {
        self.points.num_points()
    }
    fn num_bands(&self) -> usize {
        self.num_bands
    }
    fn volume(&self) -> f64 {
        self.volume
    }
    fn energy(&self, state: usize) -> f64 {
        self.energies[state]
    }
    fn group_velocity(&self, state: usize) -> [f64; 3] {
        let (ik, ib) = self.decompress(state);
        self.point(ik).velocity(ib)
    }
    fn wavevector(&self, state: usize) -> [f64; 3] {
        let (ik, _) = self.decompress(state);
        self.points.cartesian(ik)
    }
}
