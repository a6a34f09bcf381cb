//! Matrix sign function and polar decomposition.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy};
use crate::solver::{check_output, difference_norm, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

/// Newton–Schulz sign iteration `Z ← ½·Z·(3I − Z²)` from `Z₀ = A/‖A‖_F`.
/// With `polar` set the square is `Zᴴ·Z` and the limit is the unitary
/// polar factor.
fn sign_kernel<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
    polar: bool,
) -> Result<Matrix<T>, SpError> {
    let norm = a.norm();
    if norm == 0.0 {
        return Err(SpError::InvalidArgument("sign of a zero matrix is undefined".to_string()));
    }
    let mut z = a.clone();
    z.scale(T::from_real(1.0 / norm));
    while ctx.is_running() {
        let square = if polar {
            let zh = z.adjoint()?;
            ctx.multiply(&zh, &z)?
        } else {
            ctx.multiply(&z, &z)?
        };
        let t = ctx.shift(1.5, &square, -0.5)?;
        let next = ctx.multiply(&z, &t)?;
        let residual = difference_norm(&next, &z)?;
        z = next;
        ctx.step(residual);
    }
    Ok(z)
}

/// `(U, H)` with `A = U·H` on an already relabeled operand. `H = Uᴴ·A` is
/// symmetrized to remove rounding asymmetry.
pub(crate) fn polar_factors<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
) -> Result<(Matrix<T>, Matrix<T>), SpError> {
    let u = sign_kernel(ctx, a, true)?;
    let h = ctx.multiply(&u.adjoint()?, a)?;
    let h = ctx.combine(T::from_real(0.5), &h, T::from_real(0.5), &h.adjoint()?)?;
    Ok((u, h))
}

fn sign_with<T: Scalar>(
    name: &'static str,
    strategy: GemmStrategy,
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let mut ctx = SolverContext::new(name, input, params, strategy);
    let a = ctx.permute(input)?;
    let z = sign_kernel(&mut ctx, &a, false)?;
    *output = ctx.unpermute(&z)?;
    Ok(ctx.finish())
}

/// `sign(A)` for a matrix with no eigenvalues on the imaginary axis.
pub fn compute_sign<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    sign_with("compute_sign", GemmStrategy::Sparse, input, output, params)
}

pub fn compute_dense_sign<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    sign_with("compute_dense_sign", GemmStrategy::Dense, input, output, params)
}

/// `A = U·H` with `U` unitary and `H` Hermitian positive semidefinite.
pub fn compute_polar_decomposition<T: Scalar>(
    input: &Matrix<T>,
    unitary: &mut Matrix<T>,
    hermitian: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, unitary)?;
    check_output(input, hermitian)?;
    let mut ctx = SolverContext::new("compute_polar_decomposition", input, params, GemmStrategy::Sparse);
    let a = ctx.permute(input)?;
    let (u, h) = polar_factors(&mut ctx, &a)?;
    *unitary = ctx.unpermute(&u)?;
    *hermitian = ctx.unpermute(&h)?;
    Ok(ctx.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessGrid;
    use crate::matrix::TripletList;
    use num_complex::Complex64;

    #[test]
    fn sign_of_indefinite_symmetric() {
        let grid = ProcessGrid::serial();
        let mut list = TripletList::new();
        for i in 0..6 {
            list.push(i, i, if i < 3 { -2.0 - i as f64 } else { 1.0 + i as f64 });
            if i + 1 < 6 {
                list.push(i, i + 1, 0.3);
                list.push(i + 1, i, 0.3);
            }
        }
        let mut a = Matrix::<f64>::new(&grid, 6);
        a.fill_from_replicated_triplets(&list).unwrap();
        let params = SolverParameters::default().with_threshold(0.0).with_converge_diff(1e-12);
        let (mut s, mut d) = (a.zeros_like(), a.zeros_like());
        assert!(compute_sign(&a, &mut s, &params).unwrap().converged);
        compute_dense_sign(&a, &mut d, &params).unwrap();
        let s2 = s.multiply(&s, &mut Default::default()).unwrap();
        assert!(difference_norm(&s2, &Matrix::identity(&grid, 6)).unwrap() < 1e-10);
        assert!(difference_norm(&s, &d).unwrap() < 1e-10);
        assert!((s.trace() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn polar_factors_reconstruct() {
        let grid = ProcessGrid::serial();
        let mut list = TripletList::new();
        list.push(0, 0, Complex64::new(2.0, 0.5));
        list.push(0, 1, Complex64::new(-1.0, 0.0));
        list.push(1, 1, Complex64::new(1.5, -1.0));
        list.push(2, 0, Complex64::new(0.0, 0.7));
        list.push(2, 2, Complex64::new(3.0, 0.0));
        let mut a = Matrix::new(&grid, 3);
        a.fill_from_replicated_triplets(&list).unwrap();
        let params = SolverParameters::default().with_threshold(0.0).with_converge_diff(1e-12);
        let (mut u, mut h) = (a.zeros_like(), a.zeros_like());
        compute_polar_decomposition(&a, &mut u, &mut h, &params).unwrap();
        let mut pool = Default::default();
        let uh = u.multiply(&h, &mut pool).unwrap();
        assert!(difference_norm(&uh, &a).unwrap() < 1e-9);
        let utu = u.adjoint().unwrap().multiply(&u, &mut pool).unwrap();
        assert!(difference_norm(&utu, &Matrix::identity(&grid, 3)).unwrap() < 1e-9);
    }
}
