//! Quasiparticle states and the pieces of the linearized BTE built on them:
//! statistics, band structure, the state-pair vector, the drift term and the
//! transport observables.

pub mod bandstructure;
pub mod coupling;
pub mod drift;
pub mod observables;
pub mod statistics;
pub mod system;
pub mod vector;

pub use bandstructure::{FullBandStructure, PointView, Points};
pub use coupling::TabulatedCoupling;
pub use drift::bulk_drift;
pub use observables::{SpecificHeat, ThermalConductivity, Viscosity};
pub use statistics::{CalcStatistics, Particle, PopulationFactors, StatisticsSweep};
pub use system::TransportSystem;
pub use vector::{DIMENSIONS, VectorBte};
