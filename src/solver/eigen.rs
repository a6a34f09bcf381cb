//! Eigen and singular value decompositions built on purification.
//!
//! The lowest `k` eigenpairs of a Hermitian `A` come from the projector
//! onto their span: TRS4 on `A` with `k` occupied states gives `P`, a
//! rank-`k` pivoted Cholesky factor of `P` gives a basis `L`, and after
//! orthonormalizing with `(LᴴL)^{-1/2}` the `k×k` matrix `QᴴAQ` is small
//! enough to diagonalize densely. Operands are not relabeled here since
//! that would reorder the eigenvector columns.

use faer::Mat;

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{dense, DistributedSparseMatrix, GemmStrategy, TripletList};
use crate::solver::analysis::dominant_eigenvalue;
use crate::solver::density::{purify, Purification};
use crate::solver::linear::cholesky_factor;
use crate::solver::sign::polar_factors;
use crate::solver::{check_output, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

/// Dense copy of the leading `k×k` block.
fn leading_block<T: Scalar>(m: &Matrix<T>, k: usize) -> Result<Mat<T>, SpError> {
    let mut block = Mat::<T>::zeros(k, k);
    for t in m.get_matrix_block(0, k, 0, k)? {
        block[(t.row, t.column)] = t.value;
    }
    Ok(block)
}

/// Distributed matrix shaped like `like` with `block` in its leading corner.
fn embed<T: Scalar>(like: &Matrix<T>, block: &Mat<T>) -> Result<Matrix<T>, SpError> {
    let mut list = TripletList::new();
    for j in 0..block.ncols() {
        for i in 0..block.nrows() {
            let v = block[(i, j)];
            if v != T::zero() {
                list.push(i, j, v);
            }
        }
    }
    let mut m = like.zeros_like();
    m.fill_from_replicated_triplets(&list)?;
    Ok(m)
}

/// Orthonormal basis of the lowest `k` eigenvectors in columns `0..m`,
/// `m ≤ k`.
pub(crate) fn lowest_subspace<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
    k: usize,
) -> Result<(Matrix<T>, usize), SpError> {
    if k == a.actual_dimension() {
        return Ok((Matrix::identity(a.grid(), k), k));
    }
    let (projector, _) = purify(ctx, a, k, Purification::Trs4)?;
    let (l, m) = cholesky_factor(&projector, Some(k), ctx.threshold())?;
    if m < k {
        tracing::warn!(requested = k, found = m, "projector has lower rank than requested");
    }
    let overlap = ctx.multiply(&l.adjoint()?, &l)?;
    let isq = dense::inverse_square_root(leading_block(&overlap, m)?.as_ref())?;
    let q = ctx.multiply(&l, &embed(a, &isq)?)?;
    Ok((q, m))
}

/// Dense, symmetrized `QᴴAQ` restricted to the first `m` columns of `Q`.
pub(crate) fn reduced<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
    q: &Matrix<T>,
    m: usize,
) -> Result<Mat<T>, SpError> {
    let aq = ctx.multiply(a, q)?;
    let r = leading_block(&ctx.multiply(&q.adjoint()?, &aq)?, m)?;
    Ok(Mat::from_fn(m, m, |i, j| (r[(i, j)] + r[(j, i)].conjugate()).scale_by(0.5)))
}

/// Lowest `k` eigenvalues (ascending) and the matching eigenvectors as
/// columns.
fn eigen_kernel<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
    k: usize,
) -> Result<(Vec<f64>, Matrix<T>), SpError> {
    let n = a.actual_dimension();
    if k == 0 || k > n {
        return Err(SpError::InvalidArgument(format!("{k} eigenpairs for dimension {n}")));
    }
    let (q, m) = lowest_subspace(ctx, a, k)?;
    let (values, w) = dense::self_adjoint_eigen(reduced(ctx, a, &q, m)?.as_ref())?;
    let vectors = ctx.multiply(&q, &embed(a, &w)?)?;
    Ok((values, vectors))
}

fn diagonal_of<T: Scalar>(like: &Matrix<T>, values: &[f64]) -> Result<Matrix<T>, SpError> {
    let mut diagonal = vec![T::zero(); like.actual_dimension()];
    for (d, &v) in diagonal.iter_mut().zip(values) {
        *d = T::from_real(v);
    }
    let mut m = like.zeros_like();
    m.fill_diagonal(&diagonal)?;
    Ok(m)
}

/// The lowest `k` eigenvalues of a Hermitian matrix, ascending on the
/// diagonal of `values`; the rest of the diagonal is zero.
pub fn eigen_values<T: Scalar>(
    input: &Matrix<T>,
    values: &mut Matrix<T>,
    k: usize,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, values)?;
    let mut ctx = SolverContext::new("eigen_values", input, params, GemmStrategy::Sparse);
    let (lambda, _) = eigen_kernel(&mut ctx, input, k)?;
    *values = diagonal_of(input, &lambda)?;
    Ok(ctx.finish())
}

/// Lowest `k` eigenpairs of a Hermitian matrix: `values` as for
/// [`eigen_values`], eigenvectors in the first `k` columns of `vectors`.
pub fn eigen_decomposition<T: Scalar>(
    input: &Matrix<T>,
    values: &mut Matrix<T>,
    k: usize,
    vectors: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, values)?;
    check_output(input, vectors)?;
    let mut ctx = SolverContext::new("eigen_decomposition", input, params, GemmStrategy::Sparse);
    let (lambda, v) = eigen_kernel(&mut ctx, input, k)?;
    *values = diagonal_of(input, &lambda)?;
    *vectors = v;
    Ok(ctx.finish())
}

/// `A = L·Σ·Rᴴ` with the singular values ascending on the diagonal of
/// `values`. Built from the polar decomposition `A = U·H` and the
/// eigendecomposition `H = V·Σ·Vᴴ`: `L = U·V`, `R = V`.
pub fn singular_value_decomposition<T: Scalar>(
    input: &Matrix<T>,
    left: &mut Matrix<T>,
    right: &mut Matrix<T>,
    values: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, left)?;
    check_output(input, right)?;
    check_output(input, values)?;
    let mut ctx = SolverContext::new("singular_value_decomposition", input, params, GemmStrategy::Sparse);
    let (u, h) = polar_factors(&mut ctx, input)?;
    let (sigma, v) = eigen_kernel(&mut ctx, &h, input.actual_dimension())?;
    *left = ctx.multiply(&u, &v)?;
    *right = v;
    *values = diagonal_of(input, &sigma)?;
    Ok(ctx.finish())
}

/// Estimate the gap between the highest occupied and lowest unoccupied
/// eigenvalue of `H` given its density matrix `K` and a chemical potential
/// inside the gap. Both edges come from power iteration, on
/// `K·(H − λ_min·I)·K` and on `(I − K)·(λ_max·I − H)·(I − K)`, with Gershgorin
/// bounds as shifts; they are clamped to the chemical potential. Near
/// degenerate edges converge slowly, so the result is only as tight as
/// `params.converge_diff` allows.
pub fn estimate_gap<T: Scalar>(
    hamiltonian: &Matrix<T>,
    density: &Matrix<T>,
    chemical_potential: f64,
    params: &SolverParameters,
) -> Result<f64, SpError> {
    check_output(hamiltonian, density)?;
    let mut ctx = SolverContext::new("estimate_gap", hamiltonian, params, GemmStrategy::Sparse);
    let h = ctx.permute(hamiltonian)?;
    let k = ctx.permute(density)?;
    let (lower, upper) = h.gershgorin_bounds();

    let shifted = ctx.shift(-lower, &h, 1.0)?;
    let occupied = ctx.multiply(&k, &shifted)?;
    let occupied = ctx.multiply(&occupied, &k)?;
    let homo = (dominant_eigenvalue(&mut ctx, &occupied)? + lower).min(chemical_potential);

    ctx.next_phase();
    let complement = ctx.shift(1.0, &k, -1.0)?;
    let shifted = ctx.shift(upper, &h, -1.0)?;
    let virtuals = ctx.multiply(&complement, &shifted)?;
    let virtuals = ctx.multiply(&virtuals, &complement)?;
    let lumo = (upper - dominant_eigenvalue(&mut ctx, &virtuals)?).max(chemical_potential);

    if params.verbose && hamiltonian.grid().is_root() {
        tracing::info!(homo, lumo, "gap edges");
    }
    ctx.finish();
    Ok(lumo - homo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessGrid;
    use crate::solver::difference_norm;
    use num_complex::Complex64;

    fn banded(grid: &ProcessGrid, n: usize, split: usize) -> Matrix<f64> {
        let mut list = TripletList::new();
        for i in 0..n {
            let shift = if i < split { 0.0 } else { 4.0 };
            list.push(i, i, 0.3 * i as f64 + shift);
            if i + 1 < n {
                list.push(i, i + 1, 0.2);
                list.push(i + 1, i, 0.2);
            }
        }
        let mut m = Matrix::new(grid, n);
        m.fill_from_replicated_triplets(&list).unwrap();
        m
    }

    fn reconstruct<T: Scalar>(values: &Matrix<T>, vectors: &Matrix<T>) -> Matrix<T> {
        let mut pool = Default::default();
        let vl = vectors.multiply(values, &mut pool).unwrap();
        vl.multiply(&vectors.adjoint().unwrap(), &mut pool).unwrap()
    }

    #[test]
    fn full_decomposition_reconstructs() {
        let grid = ProcessGrid::serial();
        let a = banded(&grid, 6, 6);
        let (mut values, mut vectors) = (a.zeros_like(), a.zeros_like());
        eigen_decomposition(&a, &mut values, 6, &mut vectors, &SolverParameters::default()).unwrap();
        assert!(difference_norm(&reconstruct(&values, &vectors), &a).unwrap() < 1e-10);
        let (expected, _) = dense::self_adjoint_eigen(a.to_dense().unwrap().as_ref()).unwrap();
        let d = values.to_dense().unwrap();
        for (i, e) in expected.iter().enumerate() {
            assert!((d[(i, i)] - e).abs() < 1e-10);
        }
    }

    #[test]
    fn partial_decomposition_is_truncated_spectrum() {
        let grid = ProcessGrid::serial();
        let a = banded(&grid, 8, 3);
        let params = SolverParameters::default().with_threshold(0.0).with_converge_diff(1e-10);
        let (mut values, mut vectors) = (a.zeros_like(), a.zeros_like());
        eigen_decomposition(&a, &mut values, 3, &mut vectors, &params).unwrap();

        let (expected, v) = dense::self_adjoint_eigen(a.to_dense().unwrap().as_ref()).unwrap();
        let d = values.to_dense().unwrap();
        for i in 0..8 {
            let want = if i < 3 { expected[i] } else { 0.0 };
            assert!((d[(i, i)] - want).abs() < 1e-8, "value {i}");
        }
        let truncated = Mat::from_fn(8, 8, |i, j| (0..3).map(|k| v[(i, k)] * expected[k] * v[(j, k)]).sum::<f64>());
        let truncated = Matrix::from_dense(&grid, truncated.as_ref()).unwrap();
        assert!(difference_norm(&reconstruct(&values, &vectors), &truncated).unwrap() < 1e-6);

        let mut only = a.zeros_like();
        eigen_values(&a, &mut only, 3, &params).unwrap();
        assert!(difference_norm(&only, &values).unwrap() < 1e-8);
    }

    #[test]
    fn complex_hermitian_decomposition() {
        let grid = ProcessGrid::serial();
        let mut list = TripletList::new();
        for i in 0..5 {
            list.push(i, i, Complex64::new(i as f64, 0.0));
            if i + 1 < 5 {
                list.push(i, i + 1, Complex64::new(0.3, 0.4));
                list.push(i + 1, i, Complex64::new(0.3, -0.4));
            }
        }
        let mut a = Matrix::new(&grid, 5);
        a.fill_from_replicated_triplets(&list).unwrap();
        let (mut values, mut vectors) = (a.zeros_like(), a.zeros_like());
        eigen_decomposition(&a, &mut values, 5, &mut vectors, &SolverParameters::default()).unwrap();
        assert!(difference_norm(&reconstruct(&values, &vectors), &a).unwrap() < 1e-10);
    }

    #[test]
    fn singular_values_reconstruct() {
        let grid = ProcessGrid::serial();
        let mut list = TripletList::new();
        for i in 0..5 {
            list.push(i, i, 1.0 + i as f64);
            list.push(i, (i + 2) % 5, -0.7);
        }
        let mut a = Matrix::<f64>::new(&grid, 5);
        a.fill_from_replicated_triplets(&list).unwrap();
        let params = SolverParameters::default().with_threshold(0.0).with_converge_diff(1e-12);
        let (mut l, mut r, mut s) = (a.zeros_like(), a.zeros_like(), a.zeros_like());
        singular_value_decomposition(&a, &mut l, &mut r, &mut s, &params).unwrap();

        let mut pool = Default::default();
        let ls = l.multiply(&s, &mut pool).unwrap();
        let lsr = ls.multiply(&r.adjoint().unwrap(), &mut pool).unwrap();
        assert!(difference_norm(&lsr, &a).unwrap() < 1e-9);
        let sigma = s.to_dense().unwrap();
        for i in 1..5 {
            assert!(sigma[(i - 1, i - 1)] <= sigma[(i, i)] + 1e-12);
        }
        assert!(sigma[(0, 0)] > 0.0);
    }

    #[test]
    fn gap_of_split_spectrum() {
        let grid = ProcessGrid::serial();
        let mut h = Matrix::<f64>::new(&grid, 6);
        h.fill_diagonal(&[-3.0, -2.5, -2.0, 1.0, 1.5, 2.5]).unwrap();
        let mut k = Matrix::new(&grid, 6);
        k.fill_diagonal(&[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]).unwrap();
        let params = SolverParameters::default().with_converge_diff(1e-12);
        let gap = estimate_gap(&h, &k, -0.5, &params).unwrap();
        assert!((gap - 3.0).abs() < 1e-3);
    }
}
