//! Solver and grid options.
//!
//! `SolverParameters` is the snapshot every solver call consumes;
//! `GridOptions` carries the process-grid shape, either given explicitly or
//! read from the `PROCESS_ROWS`, `PROCESS_COLUMNS` and `PROCESS_SLICES`
//! environment variables.

use crate::error::SpError;
use crate::matrix::permutation::Permutation;

/// Iteration controls shared by every solver.
#[derive(Debug, Clone)]
pub struct SolverParameters {
    /// Stop once the convergence measure drops to this value.
    pub converge_diff: f64,
    /// Entries with magnitude below this are dropped from products.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Relabel operands before iterating and undo it on the results.
    pub load_balance: Option<Permutation>,
    /// Log the call and its outcome (root process only).
    pub verbose: bool,
    /// Log every iteration's residual at `debug`.
    pub monitor_convergence: bool,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            converge_diff: 1e-8,
            threshold: 1e-12,
            max_iterations: 1000,
            load_balance: None,
            verbose: false,
            monitor_convergence: false,
        }
    }
}

impl SolverParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_converge_diff(mut self, converge_diff: f64) -> Self {
        self.converge_diff = converge_diff;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_load_balance(mut self, permutation: Permutation) -> Self {
        self.load_balance = Some(permutation);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_monitor_convergence(mut self, monitor: bool) -> Self {
        self.monitor_convergence = monitor;
        self
    }
}

/// Shape of a process grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridOptions {
    pub rows: usize,
    pub columns: usize,
    pub slices: usize,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self { rows: 1, columns: 1, slices: 1 }
    }
}

impl GridOptions {
    pub fn new(rows: usize, columns: usize, slices: usize) -> Self {
        Self { rows, columns, slices }
    }

    /// Read the grid shape from the environment. Missing variables default
    /// to 1; values that are not positive integers are a `Config` error.
    pub fn from_env() -> Result<Self, SpError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| -> Result<usize, SpError> {
            match lookup(name) {
                None => Ok(1),
                Some(raw) => match raw.trim().parse::<usize>() {
                    Ok(v) if v > 0 => Ok(v),
                    _ => Err(SpError::Config(format!(
                        "{name} must be a positive integer, got {raw:?}"
                    ))),
                },
            }
        };
        Ok(Self {
            rows: read("PROCESS_ROWS")?,
            columns: read("PROCESS_COLUMNS")?,
            slices: read("PROCESS_SLICES")?,
        })
    }

    pub fn processes(&self) -> usize {
        self.rows * self.columns * self.slices
    }
}
