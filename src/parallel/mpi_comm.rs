/// MPI-based parallel communication module.
///
/// This module provides an implementation of the `Comm` trait on top of the MPI world
/// communicator. Sum reductions and broadcasts map directly onto `MPI_Allreduce` and
/// `MPI_Bcast`. The implementation is only available when the `mpi` feature is enabled.
///
/// # Example
/// ```no_run
/// # #[cfg(feature = "mpi")] {
/// use relaxon::parallel::{Comm, MpiComm};
/// let comm = MpiComm::new().unwrap();
/// println!("Rank: {} / {}", comm.rank(), comm.size());
/// comm.barrier();
/// # }
/// ```
use crate::error::BteError;
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

/// MPI communicator wrapper for distributed parallelism.
///
/// Holds the MPI universe (finalized on drop), the world communicator, the rank of the
/// current process and the total number of processes.
pub struct MpiComm {
    _universe: Universe,
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Initializes MPI and constructs a new `MpiComm` instance.
    ///
    /// Fails if MPI was already initialized by someone else.
    pub fn new() -> Result<Self, BteError> {
        let universe = mpi::initialize()
            .ok_or_else(|| BteError::Communication("MPI already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm { _universe: universe, world, rank, size })
    }
}

impl super::Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        self.world.barrier();
    }

    /// Performs an all-reduce sum across all processes.
    ///
    /// MPI aborts the whole job on failure, which is the all-or-nothing policy
    /// of the process grid.
    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<(), BteError> {
        let local = buf.to_vec();
        self.world
            .all_reduce_into(&local[..], buf, &SystemOperation::sum());
        Ok(())
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<(), BteError> {
        if root >= self.size {
            return Err(BteError::Communication(format!("broadcast root {root} out of range")));
        }
        self.world.process_at_rank(root as i32).broadcast_into(buf);
        Ok(())
    }
}
