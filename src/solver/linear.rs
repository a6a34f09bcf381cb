//! Linear systems and Cholesky factors.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy, TripletList};
use crate::parallel::Comm;
use crate::solver::{check_output, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

/// Jacobi preconditioner `D⁻¹` as a distributed diagonal matrix. Zero
/// diagonal entries map to zero.
fn jacobi<T: Scalar>(a: &Matrix<T>) -> Result<Matrix<T>, SpError> {
    let n = a.actual_dimension();
    let (sr, sc) = (a.start_row(), a.start_column());
    let mut diagonal = vec![0.0; 2 * n];
    for (i, j, v) in a.local_block().iter() {
        if i + sr == j + sc && i + sr < n {
            diagonal[2 * (i + sr)] = v.real();
            diagonal[2 * (i + sr) + 1] = v.imag();
        }
    }
    a.grid().within_slice_comm().all_reduce_sum_vec(&mut diagonal);
    let inverse: Vec<T> = diagonal
        .chunks_exact(2)
        .map(|d| {
            let v = T::from_parts(d[0], d[1]);
            if v == T::zero() { T::zero() } else { T::one() / v }
        })
        .collect();
    let mut m = a.zeros_like();
    m.fill_diagonal(&inverse)?;
    Ok(m)
}

/// Solve `A·X = B` for Hermitian positive definite `A` with
/// Jacobi-preconditioned conjugate gradients over all columns at once.
/// Convergence is measured by `‖B − A·X‖_F / ‖B‖_F`. An operator that is
/// not positive definite stops the iteration with the last iterate in `x`
/// and `converged == false`.
pub fn cg_solver<T: Scalar>(
    a: &Matrix<T>,
    x: &mut Matrix<T>,
    b: &Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(a, x)?;
    check_output(a, b)?;
    let mut ctx = SolverContext::new("cg_solver", a, params, GemmStrategy::Sparse);
    let am = ctx.permute(a)?;
    let bm = ctx.permute(b)?;

    let b_norm = bm.norm();
    if b_norm == 0.0 {
        *x = a.zeros_like();
        return Ok(ctx.finish());
    }
    let m = jacobi(&am)?;
    let mut xm = am.zeros_like();
    let mut r = bm;
    let mut z = ctx.multiply(&m, &r)?;
    let mut p = z.clone();
    let mut rz = r.dot(&z)?.real();

    while ctx.is_running() {
        let q = ctx.multiply(&am, &p)?;
        let pq = p.dot(&q)?.real();
        if pq.is_nan() || pq <= 0.0 || rz == 0.0 {
            // A is not positive definite along p, or the preconditioned
            // residual vanished: keep the iterate reached so far.
            ctx.stall(r.norm() / b_norm);
            break;
        }
        let alpha = T::from_real(rz / pq);
        xm.axpy(alpha, &p)?;
        r.axpy(-alpha, &q)?;
        r.prune(ctx.threshold());
        if !ctx.step(r.norm() / b_norm) {
            break;
        }
        z = ctx.multiply(&m, &r)?;
        let rz_next = r.dot(&z)?.real();
        p = ctx.combine(T::one(), &z, T::from_real(rz_next / rz), &p)?;
        rz = rz_next;
    }

    *x = ctx.unpermute(&xm)?;
    Ok(ctx.finish())
}

/// The whole matrix on every process, as sparse columns.
fn replicated_columns<T: Scalar>(a: &Matrix<T>) -> Result<Vec<Vec<(usize, T)>>, SpError> {
    let parts = a
        .grid()
        .within_slice_comm()
        .all_gather_bytes(&a.local_triplets().to_bytes());
    let mut columns = vec![Vec::new(); a.actual_dimension()];
    for bytes in &parts {
        for t in TripletList::<T>::from_bytes(bytes)? {
            columns[t.column].push((t.row, t.value));
        }
    }
    Ok(columns)
}

/// Factor `A ≈ L·Lᴴ` column by column on the replicated matrix.
///
/// Without `rank` the pivots are taken in order and `L` is lower
/// triangular; a non-positive pivot fails with `NotPositiveDefinite`. With
/// `rank` the largest remaining diagonal is pivoted on, at most `rank`
/// columns are produced, and the factorization stops early once the
/// remaining diagonal is negligible. Returns `L` and its number of columns.
pub(crate) fn cholesky_factor<T: Scalar>(
    a: &Matrix<T>,
    rank: Option<usize>,
    threshold: f64,
) -> Result<(Matrix<T>, usize), SpError> {
    let n = a.actual_dimension();
    let columns = replicated_columns(a)?;
    let mut residual = vec![0.0; n];
    for (j, column) in columns.iter().enumerate() {
        for &(i, v) in column {
            if i == j {
                residual[j] += v.real();
            }
        }
    }
    let largest = residual.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let floor = f64::EPSILON * n as f64 * largest;

    let mut done = vec![false; n];
    // factor[m] holds column m of L; by_row[i] holds (m, L[i, m]).
    let mut factor: Vec<Vec<(usize, T)>> = Vec::new();
    let mut by_row: Vec<Vec<(usize, T)>> = vec![Vec::new(); n];
    let mut work = vec![T::zero(); n];

    for step in 0..rank.unwrap_or(n).min(n) {
        let pivot = match rank {
            None => step,
            Some(_) => (0..n)
                .filter(|&i| !done[i])
                .fold(None, |best: Option<usize>, i| match best {
                    Some(b) if residual[b] >= residual[i] => Some(b),
                    _ => Some(i),
                })
                .unwrap_or(step),
        };
        let d = residual[pivot];
        if rank.is_some() && d <= floor {
            break;
        }
        if d.is_nan() || d <= 0.0 {
            return Err(SpError::NotPositiveDefinite(pivot));
        }
        let root = d.sqrt();

        work.iter_mut().for_each(|w| *w = T::zero());
        for &(i, v) in &columns[pivot] {
            work[i] = work[i] + v;
        }
        for &(m, lpm) in &by_row[pivot] {
            let lpm = lpm.conjugate();
            for &(i, lim) in &factor[m] {
                work[i] = work[i] - lim * lpm;
            }
        }

        let mut column = vec![(pivot, T::from_real(root))];
        for i in (0..n).filter(|&i| !done[i] && i != pivot) {
            let v = work[i].scale_by(1.0 / root);
            if v.modulus() > threshold {
                residual[i] -= v.modulus_sqr();
                column.push((i, v));
            }
        }
        done[pivot] = true;
        for &(i, v) in &column {
            by_row[i].push((factor.len(), v));
        }
        factor.push(column);
    }

    let mut list = TripletList::new();
    for (m, column) in factor.iter().enumerate() {
        for &(i, v) in column {
            list.push(i, m, v);
        }
    }
    let mut l = a.zeros_like();
    l.fill_from_replicated_triplets(&list)?;
    Ok((l, factor.len()))
}

/// Lower-triangular `L` with `A = L·Lᴴ` for Hermitian positive definite `A`.
pub fn cholesky_decomposition<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let ctx = SolverContext::new("cholesky_decomposition", input, params, GemmStrategy::Sparse);
    *output = cholesky_factor(input, None, ctx.threshold())?.0;
    Ok(ctx.finish())
}

/// Rank-`rank` factor `L` (columns `0..rank`) with `A ≈ L·Lᴴ` for Hermitian
/// positive semidefinite `A`.
pub fn pivoted_cholesky_decomposition<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    rank: usize,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    if rank == 0 || rank > input.actual_dimension() {
        return Err(SpError::InvalidArgument(format!(
            "rank {rank} for dimension {}",
            input.actual_dimension()
        )));
    }
    let ctx = SolverContext::new("pivoted_cholesky_decomposition", input, params, GemmStrategy::Sparse);
    let (l, columns) = cholesky_factor(input, Some(rank), ctx.threshold())?;
    if params.verbose && input.grid().is_root() {
        tracing::info!(columns, rank, "pivoted cholesky");
    }
    *output = l;
    Ok(ctx.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessGrid;
    use crate::solver::difference_norm;
    use approx::assert_abs_diff_eq;

    fn spd(grid: &ProcessGrid, n: usize) -> Matrix<f64> {
        let mut list = TripletList::new();
        for i in 0..n {
            list.push(i, i, 4.0 + i as f64 * 0.1);
            if i + 1 < n {
                list.push(i, i + 1, -1.0);
                list.push(i + 1, i, -1.0);
            }
            if i + 3 < n {
                list.push(i, i + 3, 0.5);
                list.push(i + 3, i, 0.5);
            }
        }
        let mut m = Matrix::new(grid, n);
        m.fill_from_replicated_triplets(&list).unwrap();
        m
    }

    #[test]
    fn cg_matches_inverse() {
        let grid = ProcessGrid::serial();
        let a = spd(&grid, 9);
        let mut list = TripletList::new();
        for i in 0..9 {
            list.push(i, (2 * i) % 9, 1.0 + i as f64);
        }
        let mut b = a.zeros_like();
        b.fill_from_replicated_triplets(&list).unwrap();
        let params = SolverParameters::default().with_threshold(0.0).with_converge_diff(1e-12);
        let mut x = a.zeros_like();
        assert!(cg_solver(&a, &mut x, &b, &params).unwrap().converged);
        let mut inv = a.zeros_like();
        crate::solver::inverse::dense_invert(&a, &mut inv, &params).unwrap();
        let expected = inv.multiply(&b, &mut Default::default()).unwrap();
        assert!(difference_norm(&x, &expected).unwrap() < 1e-9);
    }

    #[test]
    fn cg_breakdown_keeps_iterate() {
        let grid = ProcessGrid::serial();
        let mut list = TripletList::new();
        for (i, j, v) in [(0, 0, 1.0), (0, 1, 3.0), (0, 2, 0.5), (1, 1, 1.0), (1, 2, 0.0), (2, 2, 1.0)] {
            list.push(i, j, v);
            if i != j {
                list.push(j, i, v);
            }
        }
        let mut a = Matrix::<f64>::new(&grid, 3);
        a.fill_from_replicated_triplets(&list).unwrap();
        let b = Matrix::identity(&grid, 3);
        let mut x = a.zeros_like();
        let stats = cg_solver(&a, &mut x, &b, &SolverParameters::default()).unwrap();
        assert!(!stats.converged);
        assert!(x.norm() > 0.0 && x.norm().is_finite());
        assert!(matches!(stats.ensure_converged(), Err(SpError::DidNotConverge { .. })));
    }

    #[test]
    fn cg_with_zero_diagonal_does_not_error() {
        let grid = ProcessGrid::serial();
        let mut list = TripletList::new();
        list.push(0, 1, 1.0);
        list.push(1, 0, 1.0);
        list.push(2, 2, 2.0);
        let mut a = Matrix::<f64>::new(&grid, 3);
        a.fill_from_replicated_triplets(&list).unwrap();
        let b = Matrix::identity(&grid, 3);
        let mut x = a.zeros_like();
        let stats = cg_solver(&a, &mut x, &b, &SolverParameters::default()).unwrap();
        assert!(!stats.converged);
        assert!(x.norm().is_finite());
    }

    #[test]
    fn cholesky_reconstructs() {
        let grid = ProcessGrid::serial();
        let a = spd(&grid, 7);
        let mut l = a.zeros_like();
        cholesky_decomposition(&a, &mut l, &SolverParameters::default().with_threshold(0.0)).unwrap();
        let dense = l.to_dense().unwrap();
        for i in 0..7 {
            assert!(dense[(i, i)] > 0.0);
            for j in i + 1..7 {
                assert_eq!(dense[(i, j)], 0.0);
            }
        }
        let llt = l.multiply(&l.adjoint().unwrap(), &mut Default::default()).unwrap();
        assert!(difference_norm(&llt, &a).unwrap() < 1e-12);
    }

    #[test]
    fn indefinite_input_is_rejected() {
        let grid = ProcessGrid::serial();
        let mut a = Matrix::<f64>::new(&grid, 3);
        a.fill_diagonal(&[1.0, -2.0, 3.0]).unwrap();
        let mut l = a.zeros_like();
        let err = cholesky_decomposition(&a, &mut l, &SolverParameters::default()).unwrap_err();
        assert_eq!(err, SpError::NotPositiveDefinite(1));
    }

    #[test]
    fn pivoted_factor_of_low_rank() {
        let grid = ProcessGrid::serial();
        // A = Σ_k v_k v_kᵀ with three independent vectors
        let n = 6;
        let vectors = [
            [1.0, 0.5, 0.0, -1.0, 2.0, 0.0],
            [0.0, 1.0, 1.0, 0.0, -0.5, 0.3],
            [2.0, 0.0, -1.0, 0.5, 0.0, 1.0],
        ];
        let mut list = TripletList::new();
        for i in 0..n {
            for j in 0..n {
                let v: f64 = vectors.iter().map(|v| v[i] * v[j]).sum();
                list.push(i, j, v);
            }
        }
        let mut a = Matrix::new(&grid, n);
        a.fill_from_replicated_triplets(&list).unwrap();
        let mut l = a.zeros_like();
        pivoted_cholesky_decomposition(&a, &mut l, 3, &SolverParameters::default().with_threshold(0.0))
            .unwrap();
        let dense = l.to_dense().unwrap();
        for i in 0..n {
            for j in 3..n {
                assert_eq!(dense[(i, j)], 0.0);
            }
        }
        let llt = l.multiply(&l.adjoint().unwrap(), &mut Default::default()).unwrap();
        assert_abs_diff_eq!(difference_norm(&llt, &a).unwrap(), 0.0, epsilon = 1e-10);
    }
}
