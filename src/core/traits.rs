//! Core traits for relaxon: matrix scalars and the physics collaborators.

use crate::bte::statistics::{CalcStatistics, Particle};
use crate::error::BteError;
use faer::{Mat, MatRef, c64};

/// Operation applied to a matrix operand of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    NoTrans,
    Trans,
    /// Conjugate transpose; identical to `Trans` for real scalars.
    Adjoint,
}

/// Scalar type of a [`DistributedMatrix`](crate::matrix::DistributedMatrix).
///
/// Collectives only move `f64` buffers, so every scalar is flattened into
/// `PARTS` real numbers for communication.
pub trait Scalar:
    Copy
    + Send
    + Sync
    + std::fmt::Debug
    + PartialEq
    + num_traits::Zero
    + num_traits::One
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
    + std::ops::Div<Output = Self>
    + std::ops::AddAssign
    + 'static
{
    const PARTS: usize;

    fn write_parts(self, out: &mut [f64]);
    fn from_parts(parts: &[f64]) -> Self;
    fn conj(self) -> Self;
    fn modulus(self) -> f64;
    fn from_real(x: f64) -> Self;

    /// `op(m)` as an owned matrix.
    fn apply_op(m: MatRef<'_, Self>, op: Op) -> Mat<Self>;
    /// Dense product `lhs * rhs`.
    fn matmul(lhs: MatRef<'_, Self>, rhs: MatRef<'_, Self>) -> Mat<Self>;
    /// Eigenpairs of a hermitian matrix, eigenvalues in ascending order.
    fn hermitian_eigen(m: MatRef<'_, Self>) -> Result<(Vec<f64>, Mat<Self>), BteError>;
}

/// Band-structure collaborator: the set of quasiparticle states.
///
/// States are flattened as `state = ik * num_bands + ib`.
pub trait BandStructure: Sync {
    fn particle(&self) -> Particle;
    fn num_points(&self) -> usize;
    fn num_bands(&self) -> usize;
    /// Unit-cell volume used to normalize transport coefficients.
    fn volume(&self) -> f64;
    fn energy(&self, state: usize) -> f64;
    fn group_velocity(&self, state: usize) -> [f64; 3];
    /// Cartesian wavevector of the state.
    fn wavevector(&self, state: usize) -> [f64; 3];

    fn num_states(&self) -> usize {
        self.num_points() * self.num_bands()
    }
    fn state_index(&self, ik: usize, ib: usize) -> usize {
        ik * self.num_bands() + ib
    }
    /// Inverse of [`state_index`](Self::state_index): `(ik, ib)`.
    fn decompress(&self, state: usize) -> (usize, usize) {
        (state / self.num_bands(), state % self.num_bands())
    }
}

/// Eigen-solution of a harmonic Hamiltonian at one wavevector.
#[derive(Debug, Clone)]
pub struct HarmonicEigen {
    pub energies: Vec<f64>,
    /// Column `b` is the eigenvector of band `b`.
    pub eigenvectors: Mat<c64>,
    /// Per-band Cartesian group velocity, if the model provides it.
    pub velocities: Option<Vec<[f64; 3]>>,
}

/// Harmonic Hamiltonian collaborator (phonon dynamical matrix or Wannier electrons).
pub trait HarmonicHamiltonian: Sync {
    fn num_bands(&self) -> usize;
    fn diagonalize(&self, wavevector: [f64; 3]) -> Result<HarmonicEigen, BteError>;
}

/// Coupling collaborator: evaluates the squared matrix elements of the scattering
/// processes connecting two states and folds them into a transition rate.
pub trait CouplingEvaluator: Sync {
    /// Symmetric, non-negative equilibrium transition rate between states `i != j`
    /// for one (temperature, chemical potential) point.
    fn transition_rate(&self, calc: &CalcStatistics, i: usize, j: usize) -> f64;
}
