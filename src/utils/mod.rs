pub mod convergence;

pub use convergence::{ConvergenceDriver, DriverState, SolveStats};
