//! Convergence tracking for iterative solvers.

use crate::error::SpError;

/// Where an iteration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    Iterating,
    Converged,
    Exhausted,
}

/// Stopping criteria and the running state of one iteration.
#[derive(Debug, Clone)]
pub struct ConvergenceDriver {
    tol: f64,
    max_iters: usize,
    iteration: usize,
    residual: f64,
    state: DriverState,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub final_residual: f64,
    pub converged: bool,
}

impl SolveStats {
    /// Stats of a direct method.
    pub fn exact() -> Self {
        Self { iterations: 0, final_residual: 0.0, converged: true }
    }

    /// Turn a non-converged outcome into `DidNotConverge`.
    pub fn ensure_converged(self) -> Result<Self, SpError> {
        if self.converged {
            Ok(self)
        } else {
            Err(SpError::DidNotConverge {
                iterations: self.iterations,
                residual: self.final_residual,
            })
        }
    }

    /// Combine the stats of two phases of one computation.
    pub fn merge(self, other: SolveStats) -> Self {
        Self {
            iterations: self.iterations + other.iterations,
            final_residual: other.final_residual,
            converged: self.converged && other.converged,
        }
    }
}

impl ConvergenceDriver {
    pub fn new(tol: f64, max_iters: usize) -> Self {
        Self {
            tol,
            max_iters,
            iteration: 0,
            residual: f64::INFINITY,
            state: DriverState::Initializing,
        }
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn residual(&self) -> f64 {
        self.residual
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Whether the caller should run another update.
    pub fn is_running(&self) -> bool {
        matches!(self.state, DriverState::Initializing | DriverState::Iterating)
    }

    /// Record the residual of the update just performed and return the new
    /// state. Non-finite residuals stop the iteration.
    pub fn step(&mut self, residual: f64) -> DriverState {
        if !self.is_running() {
            return self.state;
        }
        self.iteration += 1;
        self.residual = residual;
        self.state = if residual <= self.tol {
            DriverState::Converged
        } else if !residual.is_finite() || self.iteration >= self.max_iters {
            DriverState::Exhausted
        } else {
            DriverState::Iterating
        };
        self.state
    }

    /// Stop without converging, e.g. when the update can no longer be
    /// formed. The iterate reached so far stays the result.
    pub fn stall(&mut self, residual: f64) {
        self.residual = residual;
        self.state = DriverState::Exhausted;
    }

    pub fn stats(&self) -> SolveStats {
        SolveStats {
            iterations: self.iteration,
            final_residual: self.residual,
            converged: self.state == DriverState::Converged,
        }
    }
}
