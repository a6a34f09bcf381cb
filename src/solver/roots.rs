//! Square roots and general p-th roots of Hermitian positive definite
//! matrices.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy};
use crate::solver::inverse::newton_schulz;
use crate::solver::{check_output, distance_from_identity, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

/// Coupled Newton–Schulz: `Y → √A`, `Z → 1/√A`.
///
/// With `λ = ‖A‖_F` the scaled start `Y₀ = A/λ`, `Z₀ = I` keeps the
/// spectrum of `Z·Y` inside `(0, 1]`. Each step forms `T = (3I − Z·Y)/2`
/// and updates `Y ← Y·T`, `Z ← T·Z`; the residual is `‖I − Z·Y‖_F`.
pub(crate) fn coupled_newton_schulz<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
) -> Result<(Matrix<T>, Matrix<T>), SpError> {
    let lambda = a.norm();
    if lambda == 0.0 {
        return Err(SpError::NotPositiveDefinite(0));
    }
    let mut y = a.clone();
    y.scale(T::from_real(1.0 / lambda));
    let mut z = Matrix::identity(a.grid(), a.actual_dimension());
    while ctx.is_running() {
        let zy = ctx.multiply(&z, &y)?;
        let residual = distance_from_identity(&zy)?;
        let t = ctx.shift(1.5, &zy, -0.5)?;
        y = ctx.multiply(&y, &t)?;
        z = ctx.multiply(&t, &z)?;
        ctx.step(residual);
    }
    y.scale(T::from_real(lambda.sqrt()));
    z.scale(T::from_real(1.0 / lambda.sqrt()));
    Ok((y, z))
}

fn root_pair<T: Scalar>(
    name: &'static str,
    strategy: GemmStrategy,
    want_inverse: bool,
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let mut ctx = SolverContext::new(name, input, params, strategy);
    let a = ctx.permute(input)?;
    let (root, inverse_root) = coupled_newton_schulz(&mut ctx, &a)?;
    *output = ctx.unpermute(if want_inverse { &inverse_root } else { &root })?;
    Ok(ctx.finish())
}

/// `A^{1/2}`.
pub fn square_root<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    root_pair("square_root", GemmStrategy::Sparse, false, input, output, params)
}

/// `A^{-1/2}`.
pub fn inverse_square_root<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    root_pair("inverse_square_root", GemmStrategy::Sparse, true, input, output, params)
}

pub fn dense_square_root<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    root_pair("dense_square_root", GemmStrategy::Dense, false, input, output, params)
}

pub fn dense_inverse_square_root<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    root_pair("dense_inverse_square_root", GemmStrategy::Dense, true, input, output, params)
}

fn power<T: Scalar>(
    ctx: &mut SolverContext<T>,
    x: &Matrix<T>,
    exponent: usize,
) -> Result<Matrix<T>, SpError> {
    let mut out = x.clone();
    for _ in 1..exponent {
        out = ctx.multiply(&out, x)?;
    }
    Ok(out)
}

/// `A^{-1/p}` on an already relabeled operand.
///
/// Guo–Higham iteration from `X₀ = I/c`, `M₀ = A/c^p` with `c^p = ‖A‖_F`:
/// `T = ((p+1)I − M)/p`, `X ← X·T`, `M ← T^p·M`, until `M ≈ I`.
fn inverse_root_kernel<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
    p: usize,
) -> Result<Matrix<T>, SpError> {
    match p {
        1 => {
            return newton_schulz(ctx, a)?
                .ok_or_else(|| SpError::InvalidArgument("cannot invert a zero matrix".to_string()));
        }
        2 => return Ok(coupled_newton_schulz(ctx, a)?.1),
        _ => {}
    }
    let norm = a.norm();
    if norm == 0.0 {
        return Err(SpError::NotPositiveDefinite(0));
    }
    let pf = p as f64;
    let c = norm.powf(1.0 / pf);
    let mut x = Matrix::identity(a.grid(), a.actual_dimension());
    x.scale(T::from_real(1.0 / c));
    let mut m = a.clone();
    m.scale(T::from_real(1.0 / norm));
    while ctx.is_running() {
        let t = ctx.shift((pf + 1.0) / pf, &m, -1.0 / pf)?;
        x = ctx.multiply(&x, &t)?;
        let tp = power(ctx, &t, p)?;
        m = ctx.multiply(&tp, &m)?;
        let residual = distance_from_identity(&m)?;
        ctx.step(residual);
    }
    Ok(x)
}

/// `A^{-1/p}` for `p ≥ 1`.
pub fn compute_inverse_root<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    p: usize,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    if p == 0 {
        return Err(SpError::InvalidArgument("root order must be at least 1".to_string()));
    }
    let mut ctx = SolverContext::new("compute_inverse_root", input, params, GemmStrategy::Sparse);
    let a = ctx.permute(input)?;
    let x = inverse_root_kernel(&mut ctx, &a, p)?;
    *output = ctx.unpermute(&x)?;
    Ok(ctx.finish())
}

/// `A^{1/p}` for `p ≥ 1`, as `A^{-(p-1)/p}·A`.
pub fn compute_root<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    p: usize,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    if p == 0 {
        return Err(SpError::InvalidArgument("root order must be at least 1".to_string()));
    }
    let mut ctx = SolverContext::new("compute_root", input, params, GemmStrategy::Sparse);
    let a = ctx.permute(input)?;
    let root = match p {
        1 => a,
        2 => coupled_newton_schulz(&mut ctx, &a)?.0,
        _ => {
            let x = inverse_root_kernel(&mut ctx, &a, p)?;
            let xp = power(&mut ctx, &x, p - 1)?;
            ctx.multiply(&xp, &a)?
        }
    };
    *output = ctx.unpermute(&root)?;
    Ok(ctx.finish())
}
