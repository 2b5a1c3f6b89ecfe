//! Matrix module: block-cyclic layout and the distributed dense matrix.

pub mod block_cyclic;
pub use block_cyclic::BlockCyclicLayout;
pub mod distributed;
pub use distributed::{DistributedMatrix, Storage};
