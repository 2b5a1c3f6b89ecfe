//! 2D block-cyclic distribution of a dense matrix over a process grid.
//!
//! Global row `i` lives on process row `(i / nb) mod P` at local row
//! `(i / (nb P)) nb + i mod nb`; columns follow the same rule over the `Q`
//! process columns. The owner of `(i, j)` is the rank at
//! `(process_row, process_col)` of the row-major grid.

use crate::parallel::ProcessGrid;

/// Number of rows (or columns) of an `n`-long dimension held by process `iproc` of `nprocs`.
pub fn numroc(n: usize, nb: usize, iproc: usize, nprocs: usize) -> usize {
    let nblocks = n / nb;
    let mut num = (nblocks / nprocs) * nb;
    let extra = nblocks % nprocs;
    if iproc < extra {
        num += nb;
    } else if iproc == extra {
        num += n % nb;
    }
    num
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCyclicLayout {
    pub num_rows: usize,
    pub num_cols: usize,
    pub block_size: usize,
    pub grid: ProcessGrid,
    /// Grid coordinates of this rank.
    pub prow: usize,
    pub pcol: usize,
    pub local_rows: usize,
    pub local_cols: usize,
}

impl BlockCyclicLayout {
    pub fn new(
        num_rows: usize,
        num_cols: usize,
        block_size: usize,
        grid: ProcessGrid,
        rank: usize,
    ) -> Self {
        assert!(block_size > 0, "block size must be positive");
        let (prow, pcol) = grid.coords(rank);
        Self {
            num_rows,
            num_cols,
            block_size,
            grid,
            prow,
            pcol,
            local_rows: numroc(num_rows, block_size, prow, grid.rows),
            local_cols: numroc(num_cols, block_size, pcol, grid.cols),
        }
    }

    /// Same distribution rule applied to another global shape.
    pub fn reshaped(&self, num_rows: usize, num_cols: usize) -> Self {
        Self::new(
            num_rows,
            num_cols,
            self.block_size,
            self.grid,
            self.grid.rank_of(self.prow, self.pcol),
        )
    }

    pub fn row_owner(&self, i: usize) -> usize {
        (i / self.block_size) % self.grid.rows
    }
    pub fn col_owner(&self, j: usize) -> usize {
        (j / self.block_size) % self.grid.cols
    }

    pub fn owner_of(&self, i: usize, j: usize) -> usize {
        self.grid.rank_of(self.row_owner(i), self.col_owner(j))
    }

    fn to_local(&self, g: usize, nprocs: usize) -> usize {
        let nb = self.block_size;
        (g / (nb * nprocs)) * nb + g % nb
    }

    fn to_global(&self, l: usize, iproc: usize, nprocs: usize) -> usize {
        let nb = self.block_size;
        ((l / nb) * nprocs + iproc) * nb + l % nb
    }

    pub fn global_to_local(&self, i: usize, j: usize) -> Option<(usize, usize)> {
        if i >= self.num_rows || j >= self.num_cols {
            return None;
        }
        if self.row_owner(i) != self.prow || self.col_owner(j) != self.pcol {
            return None;
        }
        Some((self.to_local(i, self.grid.rows), self.to_local(j, self.grid.cols)))
    }

    pub fn local_to_global(&self, li: usize, lj: usize) -> (usize, usize) {
        (self.global_row(li), self.global_col(lj))
    }

    pub fn global_row(&self, li: usize) -> usize {
        self.to_global(li, self.prow, self.grid.rows)
    }
    pub fn global_col(&self, lj: usize) -> usize {
        self.to_global(lj, self.pcol, self.grid.cols)
    }

    /// Global indices of the locally stored rows, in local order.
    pub fn owned_rows(&self) -> Vec<usize> {
        (0..self.local_rows).map(|li| self.global_row(li)).collect()
    }
    pub fn owned_cols(&self) -> Vec<usize> {
        (0..self.local_cols).map(|lj| self.global_col(lj)).collect()
    }
}
