pub mod traits;
pub mod wrappers;

pub use traits::{BandStructure, CouplingEvaluator, HarmonicEigen, HarmonicHamiltonian, Op, Scalar};
