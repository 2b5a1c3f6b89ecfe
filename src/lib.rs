//! relaxon: linearized Boltzmann transport over a distributed scattering matrix
//!
//! This crate assembles the scattering matrix of electrons or phonons, stores it
//! either replicated or block-cyclically distributed over a process grid, and
//! solves the linearized BTE with the relaxation-time approximation, the
//! Omini-Sparavigna iteration, a variational conjugate gradient, or a full
//! eigendecomposition (relaxons). Parallelism is shared-memory through rayon
//! and distributed through a pluggable communicator (threads or MPI).

pub mod parallel;

pub mod bte;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod scattering;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use crate::bte::*;
pub use crate::config::*;
pub use crate::context::*;
pub use crate::core::*;
pub use crate::error::*;
pub use crate::matrix::*;
pub use crate::parallel::{Comm, ProcessGrid, SerialComm, ThreadComm};
pub use crate::scattering::*;
pub use crate::solver::*;

// Re-export SolveStats at the crate root for convenience
pub use crate::utils::convergence::SolveStats;
