//! Configuration records passed to grids and solvers.

pub mod options;
pub use options::{GridOptions, SolverParameters};
