//! Matrix inverse and pseudoinverse.
//!
//! Newton–Schulz iteration `X ← 2X − X·A·X` from `X₀ = Aᴴ/‖A‖_F²`, whose
//! start makes every eigenvalue of `A·X₀` lie in `(0, 1]`. Convergence is
//! measured by the change between iterates.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{dense, DistributedSparseMatrix, GemmStrategy};
use crate::solver::{check_output, difference_norm, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

/// Newton–Schulz on an already relabeled operand. `None` for a zero matrix.
pub(crate) fn newton_schulz<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
) -> Result<Option<Matrix<T>>, SpError> {
    let norm = a.norm();
    if norm == 0.0 {
        return Ok(None);
    }
    let mut x = a.adjoint()?;
    x.scale(T::from_real(1.0 / (norm * norm)));
    while ctx.is_running() {
        let ax = ctx.multiply(a, &x)?;
        let xax = ctx.multiply(&x, &ax)?;
        // X_{k+1} - X_k = X_k - X_k·A·X_k
        let residual = difference_norm(&x, &xax)?;
        x = ctx.combine(T::from_real(2.0), &x, -T::one(), &xax)?;
        ctx.step(residual);
    }
    Ok(Some(x))
}

/// `A⁻¹` by Newton–Schulz.
pub fn invert<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let mut ctx = SolverContext::new("invert", input, params, GemmStrategy::Sparse);
    let a = ctx.permute(input)?;
    let x = newton_schulz(&mut ctx, &a)?
        .ok_or_else(|| SpError::InvalidArgument("cannot invert a zero matrix".to_string()))?;
    *output = ctx.unpermute(&x)?;
    Ok(ctx.finish())
}

/// Moore–Penrose pseudoinverse. The same iteration as [`invert`], followed
/// by one `X·A·X` pass that removes what the iteration left in the null
/// space.
pub fn pseudo_inverse<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let mut ctx = SolverContext::new("pseudo_inverse", input, params, GemmStrategy::Sparse);
    let a = ctx.permute(input)?;
    let result = match newton_schulz(&mut ctx, &a)? {
        Some(x) => {
            let ax = ctx.multiply(&a, &x)?;
            ctx.multiply(&x, &ax)?
        }
        None => a.zeros_like(),
    };
    *output = ctx.unpermute(&result)?;
    Ok(ctx.finish())
}

/// Direct inverse of the gathered matrix through an LU factorization.
pub fn dense_invert<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let ctx = SolverContext::new("dense_invert", input, params, GemmStrategy::Dense);
    let inverse = dense::inverse(input.to_dense()?.as_ref())?;
    let mut result = Matrix::from_dense(input.grid(), inverse.as_ref())?;
    result.prune(ctx.threshold());
    *output = result;
    Ok(ctx.finish())
}
