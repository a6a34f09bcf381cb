//! sparsefn: matrix functions of large sparse matrices distributed over a
//! 3-D process grid.
//!
//! A [`ProcessGrid`] arranges the processes of a communicator into rows,
//! columns and slices. A [`DistributedSparseMatrix`] stores one sparse
//! block per process and multiplies through the slice-parallel [`gemm`].
//! Every function in [`solver`] is an iteration of such products: inverse,
//! roots, sign and polar factors, exponential, logarithm, sine and cosine,
//! polynomials, density matrices by purification, eigen and singular value
//! decompositions, and conjugate gradients.

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod solver;
pub mod utils;

pub use crate::config::{GridOptions, SolverParameters};
pub use crate::context::{
    construct_global_process_grid, destruct_global_process_grid, global_grid, global_is_root,
    set_global_grid, ProcessGrid,
};
pub use crate::core::Scalar;
pub use crate::error::SpError;
pub use crate::matrix::{
    gemm, gemm_with, DistributedSparseMatrix, GemmStrategy, MemoryPool, Multiplier, Permutation,
    Triplet, TripletList,
};
pub use crate::parallel::{run_threads, Comm, UniverseComm};
pub use crate::solver::*;
pub use crate::utils::convergence::{ConvergenceDriver, DriverState, SolveStats};
