//! Every polynomial evaluation scheme must agree with a spectral reference
//! `V·p(Λ)·Vᵀ` computed densely with faer.

use faer::Mat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparsefn::matrix::dense::{matmul, self_adjoint_eigen};
use sparsefn::{
    run_threads, ChebyshevPolynomial, DistributedSparseMatrix, HermitePolynomial, Polynomial,
    ProcessGrid, SolverParameters, TripletList, UniverseComm,
};

type Matrix = DistributedSparseMatrix<f64>;

const N: usize = 10;

/// Symmetric with spectrum inside `[-0.9, 0.9]`.
fn scaled_symmetric() -> TripletList<f64> {
    let mut rng = StdRng::seed_from_u64(11);
    let mut list = TripletList::new();
    for i in 0..N {
        list.push(i, i, rng.gen_range(-0.4..0.4));
        for j in i + 1..N {
            if rng.gen_bool(0.3) {
                let v = rng.gen_range(-0.05..0.05);
                list.push(i, j, v);
                list.push(j, i, v);
            }
        }
    }
    list
}

fn spectral_reference(list: &TripletList<f64>, f: impl Fn(f64) -> f64) -> Mat<f64> {
    let mut a = Mat::<f64>::zeros(N, N);
    for t in list.iter() {
        a[(t.row, t.column)] += t.value;
    }
    let (values, vectors) = self_adjoint_eigen(a.as_ref()).unwrap();
    let scaled = Mat::from_fn(N, N, |i, j| vectors[(i, j)] * f(values[j]));
    matmul(scaled.as_ref(), vectors.transpose())
}

fn max_error(computed: &Mat<f64>, expected: &Mat<f64>) -> f64 {
    let mut worst = 0.0f64;
    for i in 0..N {
        for j in 0..N {
            worst = worst.max((computed[(i, j)] - expected[(i, j)]).abs());
        }
    }
    worst
}

fn evaluate<F>(list: &TripletList<f64>, run: F) -> Vec<Mat<f64>>
where
    F: Fn(&Matrix, &mut Matrix, &SolverParameters) + Sync,
{
    run_threads(4, |comm| {
        let grid = ProcessGrid::new(UniverseComm::Thread(comm), 2, 2, 1).unwrap();
        let mut a = Matrix::new(&grid, N);
        a.fill_from_replicated_triplets(list).unwrap();
        let mut out = a.zeros_like();
        run(&a, &mut out, &SolverParameters::default().with_threshold(0.0));
        out.to_dense().unwrap()
    })
}

#[test]
fn monomial_schemes_agree() {
    let list = scaled_symmetric();
    let mut poly = Polynomial::new(12);
    for k in 0..12 {
        poly.set_coefficient(k, if k % 3 == 0 { 1.0 / (k + 1) as f64 } else { -0.5 }).unwrap();
    }
    let coefficients = poly.coefficients().to_vec();
    let expected = spectral_reference(&list, |x| coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c));

    let horner = evaluate(&list, |a, out, p| {
        poly.horner_compute(a, out, p).unwrap();
    });
    let paterson = evaluate(&list, |a, out, p| {
        poly.paterson_stockmeyer_compute(a, out, p).unwrap();
    });
    for (h, ps) in horner.iter().zip(&paterson) {
        assert!(max_error(h, &expected) < 1e-12);
        assert!(max_error(ps, &expected) < 1e-12);
    }
}

#[test]
fn chebyshev_schemes_agree() {
    let list = scaled_symmetric();
    let coefficients: Vec<f64> = (0..21).map(|k| (-0.6f64).powi(k)).collect();
    let poly = ChebyshevPolynomial::from_coefficients(coefficients.clone());
    let expected = spectral_reference(&list, |x| {
        let theta = x.acos();
        coefficients.iter().enumerate().map(|(k, c)| c * (k as f64 * theta).cos()).sum()
    });

    let direct = evaluate(&list, |a, out, p| {
        poly.compute(a, out, p).unwrap();
    });
    let factorized = evaluate(&list, |a, out, p| {
        poly.compute_factorized(a, out, p).unwrap();
    });
    for (d, f) in direct.iter().zip(&factorized) {
        assert!(max_error(d, &expected) < 1e-11);
        assert!(max_error(f, &expected) < 1e-11);
    }
}

#[test]
fn hermite_matches_recurrence() {
    let list = scaled_symmetric();
    let coefficients = vec![0.5, -1.0, 0.25, 0.125, -0.0625, 0.03125];
    let mut poly = HermitePolynomial::new(coefficients.len());
    for (k, &c) in coefficients.iter().enumerate() {
        poly.set_coefficient(k, c).unwrap();
    }
    let expected = spectral_reference(&list, |x| {
        let (mut previous, mut current) = (1.0, 2.0 * x);
        let mut sum = coefficients[0] + coefficients[1] * current;
        for (k, c) in coefficients.iter().enumerate().skip(2) {
            let next = 2.0 * x * current - 2.0 * (k - 1) as f64 * previous;
            previous = current;
            current = next;
            sum += c * current;
        }
        sum
    });
    for h in evaluate(&list, |a, out, p| {
        poly.compute(a, out, p).unwrap();
    }) {
        assert!(max_error(&h, &expected) < 1e-12);
    }
}
