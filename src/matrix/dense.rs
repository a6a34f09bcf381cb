//! Dense kernels on top of faer.
//!
//! Used for the dense gemm strategy, the direct dense inverse and the small
//! reduced eigenproblems left over after purification.

use faer::linalg::solvers::DenseSolveCore;
use faer::{Accum, Mat, MatRef, Par, Side};

use crate::core::traits::Scalar;
use crate::error::SpError;

/// `a · b`.
pub fn matmul<T: Scalar>(a: MatRef<'_, T>, b: MatRef<'_, T>) -> Mat<T> {
    let mut c = Mat::<T>::zeros(a.nrows(), b.ncols());
    faer::linalg::matmul::matmul(c.as_mut(), Accum::Replace, a, b, T::one(), Par::Seq);
    c
}

/// Inverse through a partial-pivoting LU factorization.
pub fn inverse<T: Scalar>(a: MatRef<'_, T>) -> Result<Mat<T>, SpError> {
    let inv = a.partial_piv_lu().inverse();
    for j in 0..inv.ncols() {
        for i in 0..inv.nrows() {
            let v = inv[(i, j)];
            if !(v.real().is_finite() && v.imag().is_finite()) {
                return Err(SpError::InvalidArgument("matrix is singular".to_string()));
            }
        }
    }
    Ok(inv)
}

/// Eigenvalues (ascending) and eigenvectors (columns) of a Hermitian matrix.
pub fn self_adjoint_eigen<T: Scalar>(a: MatRef<'_, T>) -> Result<(Vec<f64>, Mat<T>), SpError> {
    let n = a.nrows();
    let evd = a
        .self_adjoint_eigen(Side::Lower)
        .map_err(|_| SpError::DidNotConverge { iterations: 0, residual: f64::NAN })?;
    let s = evd.S().column_vector();
    let u = evd.U();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| s[x].real().total_cmp(&s[y].real()));
    let values = order.iter().map(|&k| s[k].real()).collect();
    let vectors = Mat::from_fn(n, n, |i, j| u[(i, order[j])]);
    Ok((values, vectors))
}

/// `A^{-1/2}` of a Hermitian positive definite matrix.
pub fn inverse_square_root<T: Scalar>(a: MatRef<'_, T>) -> Result<Mat<T>, SpError> {
    let (values, vectors) = self_adjoint_eigen(a)?;
    if let Some(k) = values.iter().position(|&v| v <= 0.0) {
        return Err(SpError::NotPositiveDefinite(k));
    }
    let n = a.nrows();
    let scaled = Mat::from_fn(n, n, |i, j| vectors[(i, j)].scale_by(values[j].sqrt().recip()));
    Ok(matmul(scaled.as_ref(), adjoint(vectors.as_ref()).as_ref()))
}

/// Conjugate transpose.
pub fn adjoint<T: Scalar>(a: MatRef<'_, T>) -> Mat<T> {
    Mat::from_fn(a.ncols(), a.nrows(), |i, j| a[(j, i)].conjugate())
}

/// Frobenius norm of `a - b`.
pub fn distance<T: Scalar>(a: MatRef<'_, T>, b: MatRef<'_, T>) -> f64 {
    let mut sum = 0.0;
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            sum += (a[(i, j)] - b[(i, j)]).modulus_sqr();
        }
    }
    sum.sqrt()
}
