//! Matrix logarithm by inverse scaling and squaring.
//!
//! Take square roots until `‖A^{1/2^s} − I‖_F ≤ 0.1`, evaluate
//! `log(I + X)` by its degree-20 Taylor series and multiply by `2^s`.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy};
use crate::solver::polynomial::paterson_stockmeyer;
use crate::solver::roots::coupled_newton_schulz;
use crate::solver::{check_output, distance_from_identity, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

const TAYLOR_DEGREE: usize = 20;
const TARGET_DISTANCE: f64 = 0.1;
const MAX_ROOTS: usize = 64;

fn logarithm_with<T: Scalar>(
    name: &'static str,
    strategy: GemmStrategy,
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let mut ctx = SolverContext::new(name, input, params, strategy);
    let mut x = ctx.permute(input)?;

    let mut roots = 0;
    while distance_from_identity(&x)? > TARGET_DISTANCE && roots < MAX_ROOTS {
        ctx.next_phase();
        x = coupled_newton_schulz(&mut ctx, &x)?.0;
        roots += 1;
    }

    x.add_identity(-T::one())?;
    // log(1 + x) = Σ_{k≥1} (−1)^{k+1} x^k / k
    let coefficients: Vec<f64> = (0..=TAYLOR_DEGREE)
        .map(|k| match k {
            0 => 0.0,
            k if k % 2 == 1 => 1.0 / k as f64,
            k => -1.0 / k as f64,
        })
        .collect();
    let mut log = paterson_stockmeyer(&mut ctx, &x, &coefficients)?;
    log.scale(T::from_real(2f64.powi(roots as i32)));
    *output = ctx.unpermute(&log)?;
    Ok(ctx.finish())
}

/// `log(A)` for Hermitian positive definite `A`.
pub fn compute_logarithm<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    logarithm_with("compute_logarithm", GemmStrategy::Sparse, input, output, params)
}

pub fn compute_dense_logarithm<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    logarithm_with("compute_dense_logarithm", GemmStrategy::Dense, input, output, params)
}
