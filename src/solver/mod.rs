//! Matrix-function solvers.
//!
//! Every solver follows the same shape: open a [`SolverContext`], relabel
//! the inputs with the configured permutation, run its update rule under the
//! context's [`ConvergenceDriver`], undo the relabeling on the outputs and
//! return the [`SolveStats`]. A solver that runs out of iterations still
//! writes its last iterate; only precondition failures are errors.

use tracing::span::EnteredSpan;

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy, Multiplier};
use crate::utils::convergence::{ConvergenceDriver, DriverState, SolveStats};

pub mod analysis;
pub mod density;
pub mod eigen;
pub mod exponential;
pub mod inverse;
pub mod linear;
pub mod logarithm;
pub mod polynomial;
pub mod roots;
pub mod sign;
pub mod trigonometry;

pub use analysis::{gershgorin_bounds, power_bounds, reduce_dimension};
pub use density::{hpcp, pm, trs2, trs4, DensityResult};
pub use eigen::{eigen_decomposition, eigen_values, estimate_gap, singular_value_decomposition};
pub use exponential::{compute_dense_exponential, compute_exponential, compute_exponential_pade};
pub use inverse::{dense_invert, invert, pseudo_inverse};
pub use linear::{cg_solver, cholesky_decomposition, pivoted_cholesky_decomposition};
pub use logarithm::{compute_dense_logarithm, compute_logarithm};
pub use polynomial::{ChebyshevPolynomial, HermitePolynomial, Polynomial};
pub use roots::{
    compute_inverse_root, compute_root, dense_inverse_square_root, dense_square_root,
    inverse_square_root, square_root,
};
pub use sign::{compute_dense_sign, compute_polar_decomposition, compute_sign};
pub use trigonometry::{cosine, dense_cosine, dense_sine, sine};

type Matrix<T> = DistributedSparseMatrix<T>;

/// Shared machinery of one solver call.
pub struct SolverContext<T> {
    params: SolverParameters,
    driver: ConvergenceDriver,
    multiplier: Multiplier<T>,
    finished: Vec<SolveStats>,
    logging: bool,
    _span: Option<EnteredSpan>,
}

impl<T: Scalar> SolverContext<T> {
    pub fn new(
        name: &'static str,
        input: &Matrix<T>,
        params: &SolverParameters,
        strategy: GemmStrategy,
    ) -> Self {
        let logging = params.verbose && input.grid().is_root();
        let span = logging.then(|| tracing::info_span!("solve", solver = name).entered());
        if logging {
            tracing::info!(
                dimension = input.actual_dimension(),
                converge_diff = params.converge_diff,
                threshold = params.threshold,
                max_iterations = params.max_iterations,
                load_balance = params.load_balance.is_some(),
                ?strategy,
                "start"
            );
        }
        Self {
            params: params.clone(),
            driver: ConvergenceDriver::new(params.converge_diff, params.max_iterations),
            multiplier: Multiplier::new(strategy, params.threshold),
            finished: Vec::new(),
            logging,
            _span: span,
        }
    }

    pub fn params(&self) -> &SolverParameters {
        &self.params
    }

    pub fn threshold(&self) -> f64 {
        self.params.threshold
    }

    pub fn strategy(&self) -> GemmStrategy {
        self.multiplier.strategy()
    }

    /// Parameters for a solver invoked from inside this one: the operands
    /// are already relabeled, so no permutation is applied again.
    pub fn inner_params(&self) -> SolverParameters {
        SolverParameters { load_balance: None, ..self.params.clone() }
    }

    pub fn multiply(&mut self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>, SpError> {
        self.multiplier.multiply(a, b)
    }

    /// `α·a + β·b`, flushed with the solver threshold.
    pub fn combine(&self, alpha: T, a: &Matrix<T>, beta: T, b: &Matrix<T>) -> Result<Matrix<T>, SpError> {
        self.multiplier.combine(alpha, a, beta, b)
    }

    /// `α·I + β·x`.
    pub fn shift(&self, alpha: f64, x: &Matrix<T>, beta: f64) -> Result<Matrix<T>, SpError> {
        let mut out = x.clone();
        out.scale(T::from_real(beta));
        out.add_identity(T::from_real(alpha))?;
        out.prune(self.params.threshold);
        Ok(out)
    }

    pub fn permute(&self, m: &Matrix<T>) -> Result<Matrix<T>, SpError> {
        match &self.params.load_balance {
            Some(p) => p.apply(m),
            None => Ok(m.clone()),
        }
    }

    pub fn unpermute(&self, m: &Matrix<T>) -> Result<Matrix<T>, SpError> {
        match &self.params.load_balance {
            Some(p) => p.undo(m),
            None => Ok(m.clone()),
        }
    }

    /// Record the residual of one update. Returns whether to keep iterating.
    pub fn step(&mut self, residual: f64) -> bool {
        let state = self.driver.step(residual);
        if self.logging && self.params.monitor_convergence {
            tracing::debug!(iteration = self.driver.iteration(), residual, "step");
        }
        state == DriverState::Iterating
    }

    /// Give up on the current iteration with `residual`.
    pub fn stall(&mut self, residual: f64) {
        if self.logging {
            tracing::warn!(iteration = self.driver.iteration(), residual, "breakdown");
        }
        self.driver.stall(residual);
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_running()
    }

    pub fn iteration(&self) -> usize {
        self.driver.iteration()
    }

    /// Close the current iteration and start a fresh one, e.g. for the next
    /// square root of a repeated root sequence.
    pub fn next_phase(&mut self) {
        if self.driver.state() != DriverState::Initializing {
            self.finished.push(self.driver.stats());
        }
        self.driver = ConvergenceDriver::new(self.params.converge_diff, self.params.max_iterations);
    }

    /// Fold in the stats of a nested solver call.
    pub fn absorb(&mut self, stats: SolveStats) {
        self.finished.push(stats);
    }

    pub fn finish(mut self) -> SolveStats {
        self.next_phase();
        let stats = self
            .finished
            .iter()
            .copied()
            .reduce(SolveStats::merge)
            .unwrap_or_else(SolveStats::exact);
        if self.logging {
            tracing::info!(
                iterations = stats.iterations,
                residual = stats.final_residual,
                converged = stats.converged,
                "done"
            );
            if !stats.converged {
                tracing::warn!(iterations = stats.iterations, "iteration limit reached");
            }
        }
        stats
    }
}

/// The output handed to a solver must live on the input's grid with the
/// input's dimension.
pub(crate) fn check_output<T: Scalar>(input: &Matrix<T>, output: &Matrix<T>) -> Result<(), SpError> {
    input.check_compatible(output)
}

/// Frobenius norm of `a - b`.
pub(crate) fn difference_norm<T: Scalar>(a: &Matrix<T>, b: &Matrix<T>) -> Result<f64, SpError> {
    Ok(Matrix::linear_combination(T::one(), a, -T::one(), b, 0.0)?.norm())
}

/// `‖x - I‖_F`.
pub(crate) fn distance_from_identity<T: Scalar>(x: &Matrix<T>) -> Result<f64, SpError> {
    let mut d = x.clone();
    d.add_identity(-T::one())?;
    Ok(d.norm())
}
