//! Every iterative solver capped at two iterations on a 2×2×1 thread grid:
//! the result is the last iterate and the stats report the shortfall.

use sparsefn::{
    cg_solver, compute_inverse_root, compute_logarithm, compute_polar_decomposition,
    compute_root, compute_sign, hpcp, invert, inverse_square_root, pm, pseudo_inverse, run_threads,
    square_root, trs2, trs4, DistributedSparseMatrix, ProcessGrid, SolveStats, SolverParameters,
    SpError, TripletList, UniverseComm,
};

type Matrix = DistributedSparseMatrix<f64>;

const N: usize = 11;

fn on_grid<R: Send>(f: impl Fn(&ProcessGrid) -> R + Sync) -> Vec<R> {
    run_threads(4, |comm| {
        let grid = ProcessGrid::new(UniverseComm::Thread(comm), 2, 2, 1).unwrap();
        f(&grid)
    })
}

fn capped() -> SolverParameters {
    SolverParameters::default()
        .with_threshold(0.0)
        .with_converge_diff(1e-12)
        .with_max_iterations(2)
}

/// Symmetric with diagonal `shift(i)` and a coupling band.
fn banded(grid: &ProcessGrid, shift: impl Fn(usize) -> f64) -> Matrix {
    let mut list = TripletList::new();
    for i in 0..N {
        list.push(i, i, shift(i));
        if i + 1 < N {
            list.push(i, i + 1, 0.4);
            list.push(i + 1, i, 0.4);
        }
    }
    let mut m = Matrix::new(grid, N);
    m.fill_from_replicated_triplets(&list).unwrap();
    m
}

fn spd(grid: &ProcessGrid) -> Matrix {
    banded(grid, |i| 1.0 + i as f64)
}

fn assert_cut_short(stats: SolveStats, output: &Matrix) {
    assert!(!stats.converged);
    assert!(stats.iterations > 0);
    let norm = output.norm();
    assert!(norm > 0.0 && norm.is_finite());
    assert!(matches!(stats.ensure_converged(), Err(SpError::DidNotConverge { .. })));
}

#[test]
fn inverse_family_returns_last_iterate() {
    on_grid(|grid| {
        let a = spd(grid);
        let mut x = a.zeros_like();
        let stats = invert(&a, &mut x, &capped()).unwrap();
        assert_cut_short(stats, &x);
        let stats = pseudo_inverse(&a, &mut x, &capped()).unwrap();
        assert_cut_short(stats, &x);
    });
}

#[test]
fn root_family_returns_last_iterate() {
    on_grid(|grid| {
        let a = spd(grid);
        let mut x = a.zeros_like();
        assert_cut_short(square_root(&a, &mut x, &capped()).unwrap(), &x);
        assert_cut_short(inverse_square_root(&a, &mut x, &capped()).unwrap(), &x);
        assert_cut_short(compute_inverse_root(&a, &mut x, 3, &capped()).unwrap(), &x);
        assert_cut_short(compute_root(&a, &mut x, 3, &capped()).unwrap(), &x);
    });
}

#[test]
fn sign_and_polar_return_last_iterate() {
    on_grid(|grid| {
        let a = banded(grid, |i| if i % 2 == 0 { -3.0 - i as f64 } else { 2.0 + i as f64 });
        let mut s = a.zeros_like();
        assert_cut_short(compute_sign(&a, &mut s, &capped()).unwrap(), &s);
        let (mut u, mut h) = (a.zeros_like(), a.zeros_like());
        let stats = compute_polar_decomposition(&a, &mut u, &mut h, &capped()).unwrap();
        assert_cut_short(stats, &u);
        assert!(h.norm().is_finite());
    });
}

#[test]
fn logarithm_reports_unconverged_roots() {
    on_grid(|grid| {
        let a = spd(grid);
        let mut log = a.zeros_like();
        assert_cut_short(compute_logarithm(&a, &mut log, &capped()).unwrap(), &log);
    });
}

#[test]
fn purification_returns_last_iterate() {
    on_grid(|grid| {
        let h = banded(grid, |i| if i < N / 2 { -2.0 + 0.1 * i as f64 } else { 1.0 + 0.3 * i as f64 });
        let isq = Matrix::identity(grid, N);
        for method in [trs2::<f64>, trs4::<f64>, pm::<f64>, hpcp::<f64>] {
            let mut k = h.zeros_like();
            let r = method(&h, &isq, N / 2, &mut k, &capped()).unwrap();
            assert_cut_short(r.stats, &k);
            assert!(r.energy.is_finite());
        }
    });
}

#[test]
fn conjugate_gradients_return_last_iterate() {
    on_grid(|grid| {
        let a = spd(grid);
        let b = Matrix::identity(grid, N);
        let mut x = a.zeros_like();
        assert_cut_short(cg_solver(&a, &mut x, &b, &capped()).unwrap(), &x);
    });
}
