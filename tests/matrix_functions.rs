//! Functional identities of the matrix-function solvers on a 2×2×1 thread
//! grid, with a dimension that needs padding.

use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparsefn::{
    compute_dense_exponential, compute_exponential, compute_exponential_pade, compute_inverse_root,
    compute_logarithm, compute_root, compute_sign, cosine, dense_invert, invert,
    inverse_square_root, pseudo_inverse, run_threads, sine, square_root, DistributedSparseMatrix,
    MemoryPool, Permutation, ProcessGrid, SolverParameters, TripletList, UniverseComm,
};

type Matrix = DistributedSparseMatrix<f64>;

const N: usize = 11;

/// Symmetric and diagonally dominant: eigenvalues lie in `[0.5, 5.5]`.
fn spd_triplets(seed: u64) -> TripletList<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut list = TripletList::new();
    for i in 0..N {
        list.push(i, i, 3.0);
        for j in i + 1..N {
            if rng.gen_bool(0.25) {
                let v = rng.gen_range(-0.25..0.25);
                list.push(i, j, v);
                list.push(j, i, v);
            }
        }
    }
    list
}

fn distance(a: &Matrix, b: &Matrix) -> f64 {
    Matrix::linear_combination(1.0, a, -1.0, b, 0.0).unwrap().norm()
}

fn on_grid<R: Send>(f: impl Fn(&ProcessGrid) -> R + Sync) -> Vec<R> {
    run_threads(4, |comm| {
        let grid = ProcessGrid::new(UniverseComm::Thread(comm), 2, 2, 1).unwrap();
        f(&grid)
    })
}

fn params() -> SolverParameters {
    SolverParameters::default().with_threshold(0.0).with_converge_diff(1e-10)
}

#[test]
fn inverse_times_matrix_is_identity() {
    let list = spd_triplets(1);
    let errors = on_grid(|grid| {
        let mut a = Matrix::new(grid, N);
        a.fill_from_replicated_triplets(&list).unwrap();
        let (mut inv, mut direct, mut pinv) = (a.zeros_like(), a.zeros_like(), a.zeros_like());
        assert!(invert(&a, &mut inv, &params()).unwrap().converged);
        dense_invert(&a, &mut direct, &params()).unwrap();
        pseudo_inverse(&a, &mut pinv, &params()).unwrap();
        let product = inv.multiply(&a, &mut MemoryPool::new()).unwrap();
        (
            distance(&product, &Matrix::identity(grid, N)),
            distance(&inv, &direct),
            distance(&pinv, &direct),
        )
    });
    for (identity, direct, pseudo) in errors {
        assert!(identity < 1e-8);
        assert!(direct < 1e-8);
        assert!(pseudo < 1e-8);
    }
}

#[test]
fn square_root_squares_back() {
    let list = spd_triplets(2);
    let errors = on_grid(|grid| {
        let mut a = Matrix::new(grid, N);
        a.fill_from_replicated_triplets(&list).unwrap();
        let (mut root, mut isq, mut cube, mut inv_cube) =
            (a.zeros_like(), a.zeros_like(), a.zeros_like(), a.zeros_like());
        square_root(&a, &mut root, &params()).unwrap();
        inverse_square_root(&a, &mut isq, &params()).unwrap();
        compute_root(&a, &mut cube, 3, &params()).unwrap();
        compute_inverse_root(&a, &mut inv_cube, 3, &params()).unwrap();
        let mut pool = MemoryPool::new();
        let squared = root.multiply(&root, &mut pool).unwrap();
        let unit = root.multiply(&isq, &mut pool).unwrap();
        let cubed = cube.multiply(&cube, &mut pool).unwrap().multiply(&cube, &mut pool).unwrap();
        let one = cube.multiply(&inv_cube, &mut pool).unwrap();
        let eye = Matrix::identity(grid, N);
        (distance(&squared, &a), distance(&unit, &eye), distance(&cubed, &a), distance(&one, &eye))
    });
    for (squared, unit, cubed, one) in errors {
        assert!(squared < 1e-8);
        assert!(unit < 1e-8);
        assert!(cubed < 1e-7);
        assert!(one < 1e-7);
    }
}

#[test]
fn exponential_inverts_logarithm() {
    let list = spd_triplets(3);
    let errors = on_grid(|grid| {
        let mut a = Matrix::new(grid, N);
        a.fill_from_replicated_triplets(&list).unwrap();
        let (mut log, mut exp) = (a.zeros_like(), a.zeros_like());
        compute_logarithm(&a, &mut log, &params()).unwrap();
        compute_exponential(&log, &mut exp, &params()).unwrap();
        distance(&exp, &a) / a.norm()
    });
    for e in errors {
        assert!(e < 1e-6);
    }
}

#[test]
fn exponential_variants_agree() {
    let list = spd_triplets(4);
    let errors = on_grid(|grid| {
        let mut a = Matrix::new(grid, N);
        a.fill_from_replicated_triplets(&list).unwrap();
        a.add_identity(-3.0).unwrap();
        let (mut taylor, mut dense, mut pade) = (a.zeros_like(), a.zeros_like(), a.zeros_like());
        compute_exponential(&a, &mut taylor, &params()).unwrap();
        compute_dense_exponential(&a, &mut dense, &params()).unwrap();
        compute_exponential_pade(&a, &mut pade, &params()).unwrap();
        (distance(&taylor, &dense), distance(&taylor, &pade) / taylor.norm())
    });
    for (dense, pade) in errors {
        assert!(dense < 1e-10);
        assert!(pade < 1e-7);
    }
}

#[test]
fn sign_squares_to_identity_with_load_balancing() {
    let list = spd_triplets(5);
    let errors = on_grid(|grid| {
        let mut a = Matrix::new(grid, N);
        a.fill_from_replicated_triplets(&list).unwrap();
        // split the spectrum around zero
        let mut diagonal = vec![0.0; N];
        for (i, d) in diagonal.iter_mut().enumerate() {
            *d = if i % 2 == 0 { -6.0 } else { 0.0 };
        }
        let mut shift = a.zeros_like();
        shift.fill_diagonal(&diagonal).unwrap();
        a.axpy(1.0, &shift).unwrap();

        let balanced = params().with_load_balance(Permutation::random(grid, N));
        let (mut s, mut t) = (a.zeros_like(), a.zeros_like());
        compute_sign(&a, &mut s, &params()).unwrap();
        compute_sign(&a, &mut t, &balanced).unwrap();
        let squared = s.multiply(&s, &mut MemoryPool::new()).unwrap();
        (distance(&squared, &Matrix::identity(grid, N)), distance(&s, &t))
    });
    for (squared, balanced) in errors {
        assert!(squared < 1e-8);
        assert!(balanced < 1e-8);
    }
}

#[test]
fn sine_and_cosine_satisfy_pythagoras() {
    let list = spd_triplets(6);
    let errors = on_grid(|grid| {
        let mut a = Matrix::new(grid, N);
        a.fill_from_replicated_triplets(&list).unwrap();
        let (mut s, mut c) = (a.zeros_like(), a.zeros_like());
        sine(&a, &mut s, &params()).unwrap();
        cosine(&a, &mut c, &params()).unwrap();
        let mut pool = MemoryPool::new();
        let mut sum = s.multiply(&s, &mut pool).unwrap();
        sum.axpy(1.0, &c.multiply(&c, &mut pool).unwrap()).unwrap();
        (distance(&sum, &Matrix::identity(grid, N)), s.trace())
    });
    let trace = errors[0].1;
    for (e, t) in errors {
        assert!(e < 1e-10);
        assert_abs_diff_eq!(t, trace, epsilon = 1e-12);
    }
}

#[test]
fn logical_length_load_balance_on_padded_grid() {
    let list = spd_triplets(9);
    let errors = on_grid(|grid| {
        let mut a = Matrix::new(grid, N);
        a.fill_from_replicated_triplets(&list).unwrap();
        assert!(a.logical_dimension() > N);
        let balanced =
            params().with_load_balance(Permutation::random(grid, a.logical_dimension()));
        let (mut plain, mut shuffled) = (a.zeros_like(), a.zeros_like());
        invert(&a, &mut plain, &params()).unwrap();
        let stats = invert(&a, &mut shuffled, &balanced).unwrap();
        assert!(stats.converged);
        distance(&plain, &shuffled)
    });
    for e in errors {
        assert!(e < 1e-8);
    }
}
