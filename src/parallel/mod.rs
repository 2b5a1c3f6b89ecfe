//! Parallel execution context.
//!
//! Every distributed object in the crate receives a `&dyn Comm` at construction
//! time; there is no process-global communicator. Three backends are provided:
//!
//! - [`SerialComm`]: a single process, all collectives are no-ops.
//! - [`ThreadComm`]: a group of ranks living on threads of one process, used to
//!   exercise distributed code paths in tests without an MPI launcher.
//! - `MpiComm` (feature `mpi`): the MPI world communicator.
//!
//! The module also hosts the contiguous work-division rule and the 2D process
//! grid used by block-cyclic matrices.

use crate::error::BteError;
use std::ops::Range;

/// Collective communication over a fixed set of cooperating processes.
pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    /// In-place sum reduction: on return every rank holds the elementwise sum.
    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<(), BteError>;
    /// Copies `buf` from `root` into `buf` on every other rank.
    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<(), BteError>;

    fn is_head(&self) -> bool {
        self.rank() == 0
    }
    /// Global task range owned by this rank.
    fn divide_work(&self, num_tasks: usize) -> Range<usize> {
        work_range(num_tasks, self.rank(), self.size())
    }
}

/// Rank `r` of `p` owns `[n*r/p, n*(r+1)/p)`.
pub fn work_range(num_tasks: usize, rank: usize, size: usize) -> Range<usize> {
    assert!(size > 0 && rank < size, "rank {rank} out of range for size {size}");
    let head = num_tasks * rank / size;
    let tail = num_tasks * (rank + 1) / size;
    head..tail
}

/// Single-process communicator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn all_reduce_sum(&self, _buf: &mut [f64]) -> Result<(), BteError> {
        Ok(())
    }
    fn broadcast(&self, _buf: &mut [f64], root: usize) -> Result<(), BteError> {
        if root != 0 {
            return Err(BteError::Communication(format!(
                "broadcast root {root} on a single process"
            )));
        }
        Ok(())
    }
}

/// Near-square 2D arrangement of the ranks, `rows * cols == size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGrid {
    pub rows: usize,
    pub cols: usize,
}

impl ProcessGrid {
    /// `rows = floor(sqrt(size))`, `cols = size / rows`; any remainder is an error.
    pub fn new(size: usize) -> Result<Self, BteError> {
        if size == 0 {
            return Err(BteError::ProcessGrid { size, rows: 0, cols: 0 });
        }
        let mut rows = (size as f64).sqrt().floor() as usize;
        // guard against sqrt rounding for large perfect squares
        while (rows + 1) * (rows + 1) <= size {
            rows += 1;
        }
        while rows * rows > size {
            rows -= 1;
        }
        let cols = size / rows;
        if rows * cols != size {
            return Err(BteError::ProcessGrid { size, rows, cols });
        }
        Ok(Self { rows, cols })
    }

    pub fn for_comm(comm: &dyn Comm) -> Result<Self, BteError> {
        Self::new(comm.size())
    }

    /// (process row, process column) of a rank, row-major over the grid.
    pub fn coords(&self, rank: usize) -> (usize, usize) {
        (rank / self.cols, rank % self.cols)
    }

    pub fn rank_of(&self, prow: usize, pcol: usize) -> usize {
        prow * self.cols + pcol
    }
}

/// Maps `f` over a task range, in parallel when the `rayon` feature is on.
#[cfg(feature = "rayon")]
pub fn map_range<U, F>(range: Range<usize>, f: F) -> Vec<U>
where
    U: Send,
    F: Fn(usize) -> U + Sync + Send,
{
    use rayon::prelude::*;
    range.into_par_iter().map(f).collect()
}

#[cfg(not(feature = "rayon"))]
pub fn map_range<U, F>(range: Range<usize>, f: F) -> Vec<U>
where
    F: Fn(usize) -> U,
{
    range.map(f).collect()
}

pub mod thread_comm;
pub use thread_comm::ThreadComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
