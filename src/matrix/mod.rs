//! Matrix types: the local CSR block, triplet lists, the distributed matrix
//! and the operations built on it.

pub mod dense;
pub mod distributed;
pub mod gemm;
pub mod io;
pub mod permutation;
pub mod sparse;
pub mod triplet;

pub use distributed::DistributedSparseMatrix;
pub use gemm::{gemm, gemm_with, GemmStrategy, MemoryPool, Multiplier};
pub use permutation::Permutation;
pub use sparse::{CsrMatrix, SpaWorkspace};
pub use triplet::{Triplet, TripletList};
