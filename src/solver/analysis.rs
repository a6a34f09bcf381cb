//! Spectral bounds and dimension reduction.

use faer::Mat;

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy, TripletList};
use crate::solver::eigen::{lowest_subspace, reduced};
use crate::solver::SolverContext;
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

/// `(lower, upper)` bound on the spectrum of a Hermitian matrix from its
/// Gershgorin discs.
pub fn gershgorin_bounds<T: Scalar>(input: &Matrix<T>) -> (f64, f64) {
    input.gershgorin_bounds()
}

/// Power iteration for the eigenvalue of largest magnitude. The iterate is
/// column 0 of an otherwise empty matrix, starting from `1/√n` in every
/// row; the Rayleigh quotient keeps the sign.
pub(crate) fn dominant_eigenvalue<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
) -> Result<f64, SpError> {
    let n = a.actual_dimension();
    if n == 0 {
        return Ok(0.0);
    }
    let start = T::from_real(1.0 / (n as f64).sqrt());
    let mut list = TripletList::with_capacity(n);
    for i in 0..n {
        list.push(i, 0, start);
    }
    let mut v = a.zeros_like();
    v.fill_from_replicated_triplets(&list)?;

    let mut value = 0.0;
    while ctx.is_running() {
        let y = ctx.multiply(a, &v)?;
        let next = v.dot(&y)?.real();
        let residual = if ctx.iteration() == 0 { f64::MAX } else { (next - value).abs() };
        value = next;
        let norm = y.norm();
        if norm == 0.0 {
            ctx.step(0.0);
            break;
        }
        v = y;
        v.scale(T::from_real(1.0 / norm));
        ctx.step(residual);
    }
    Ok(value)
}

/// Eigenvalue of largest magnitude, with its sign.
pub fn power_bounds<T: Scalar>(input: &Matrix<T>, params: &SolverParameters) -> Result<f64, SpError> {
    let mut ctx = SolverContext::new("power_bounds", input, params, GemmStrategy::Sparse);
    let a = ctx.permute(input)?;
    let value = dominant_eigenvalue(&mut ctx, &a)?;
    ctx.finish();
    Ok(value)
}

/// Project a Hermitian matrix onto the span of its lowest `dim`
/// eigenvectors. `output` becomes a `dim × dim` matrix on the same grid
/// whose eigenvalues are the lowest `dim` eigenvalues of `input`.
pub fn reduce_dimension<T: Scalar>(
    input: &Matrix<T>,
    dim: usize,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    if !input.grid().same_as(output.grid()) {
        return Err(SpError::DimensionMismatch(
            "matrices live on different process grids".to_string(),
        ));
    }
    if dim == 0 || dim > input.actual_dimension() {
        return Err(SpError::InvalidArgument(format!(
            "reduced dimension {dim} for dimension {}",
            input.actual_dimension()
        )));
    }
    let mut ctx = SolverContext::new("reduce_dimension", input, params, GemmStrategy::Sparse);
    let a = ctx.permute(input)?;
    let (q, m) = lowest_subspace(&mut ctx, &a, dim)?;
    let r = reduced(&mut ctx, &a, &q, m)?;
    let padded = Mat::from_fn(dim, dim, |i, j| if i < m && j < m { r[(i, j)] } else { T::zero() });
    let mut out = Matrix::from_dense(input.grid(), padded.as_ref())?;
    out.prune(ctx.threshold());
    *output = out;
    Ok(ctx.finish())
}
