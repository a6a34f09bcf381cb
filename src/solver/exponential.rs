//! Matrix exponential by scaling and squaring.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy};
use crate::solver::inverse::newton_schulz;
use crate::solver::polynomial::paterson_stockmeyer;
use crate::solver::{check_output, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

const TAYLOR_DEGREE: usize = 16;
const PADE_ORDER: usize = 7;

/// Smallest `s ≥ 0` with `norm / 2^s ≤ bound`.
pub(crate) fn scaling_steps(norm: f64, bound: f64) -> usize {
    let mut steps = 0;
    let mut scaled = norm;
    while scaled > bound && steps < 1024 {
        scaled /= 2.0;
        steps += 1;
    }
    steps
}

pub(crate) fn square_repeatedly<T: Scalar>(
    ctx: &mut SolverContext<T>,
    mut x: Matrix<T>,
    times: usize,
) -> Result<Matrix<T>, SpError> {
    for _ in 0..times {
        x = ctx.multiply(&x, &x)?;
    }
    Ok(x)
}

/// `exp(A)` on an already relabeled operand: degree-16 Taylor series of
/// `A/2^s` with `‖A/2^s‖_F ≤ 1`, squared `s` times.
pub(crate) fn taylor_exponential<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
) -> Result<Matrix<T>, SpError> {
    let steps = scaling_steps(a.norm(), 1.0);
    let mut scaled = a.clone();
    scaled.scale(T::from_real(0.5f64.powi(steps as i32)));
    let mut coefficients = Vec::with_capacity(TAYLOR_DEGREE + 1);
    let mut factorial = 1.0;
    for k in 0..=TAYLOR_DEGREE {
        if k > 0 {
            factorial *= k as f64;
        }
        coefficients.push(1.0 / factorial);
    }
    let e = paterson_stockmeyer(ctx, &scaled, &coefficients)?;
    square_repeatedly(ctx, e, steps)
}

fn exponential_with<T: Scalar>(
    name: &'static str,
    strategy: GemmStrategy,
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let mut ctx = SolverContext::new(name, input, params, strategy);
    let a = ctx.permute(input)?;
    let e = taylor_exponential(&mut ctx, &a)?;
    *output = ctx.unpermute(&e)?;
    Ok(ctx.finish())
}

/// `exp(A)` with Taylor series, Paterson–Stockmeyer evaluation and
/// squaring.
pub fn compute_exponential<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    exponential_with("compute_exponential", GemmStrategy::Sparse, input, output, params)
}

pub fn compute_dense_exponential<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    exponential_with("compute_dense_exponential", GemmStrategy::Dense, input, output, params)
}

/// `c_k = (2q−k)!·q! / ((2q)!·k!·(q−k)!)`.
fn pade_coefficients(q: usize) -> Vec<f64> {
    let factorial = |n: usize| (1..=n).map(|v| v as f64).product::<f64>();
    (0..=q)
        .map(|k| factorial(2 * q - k) * factorial(q) / (factorial(2 * q) * factorial(k) * factorial(q - k)))
        .collect()
}

/// `exp(A)` by a [7/7] Padé approximant of `A/2^s` (`‖A/2^s‖_F ≤ 1/2`),
/// with the denominator inverted by Newton–Schulz, squared `s` times.
pub fn compute_exponential_pade<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let mut ctx = SolverContext::new("compute_exponential_pade", input, params, GemmStrategy::Sparse);
    let a = ctx.permute(input)?;
    let steps = scaling_steps(a.norm(), 0.5);
    let mut x = a.clone();
    x.scale(T::from_real(0.5f64.powi(steps as i32)));

    let c = pade_coefficients(PADE_ORDER);
    let even: Vec<f64> = c.iter().enumerate().map(|(k, &v)| if k % 2 == 0 { v } else { 0.0 }).collect();
    let odd: Vec<f64> = c.iter().enumerate().map(|(k, &v)| if k % 2 == 1 { v } else { 0.0 }).collect();
    let v = paterson_stockmeyer(&mut ctx, &x, &even)?;
    let u = paterson_stockmeyer(&mut ctx, &x, &odd)?;
    let numerator = ctx.combine(T::one(), &v, T::one(), &u)?;
    let denominator = ctx.combine(T::one(), &v, -T::one(), &u)?;

    let inverse = newton_schulz(&mut ctx, &denominator)?
        .ok_or_else(|| SpError::InvalidArgument("Padé denominator vanished".to_string()))?;
    let r = ctx.multiply(&inverse, &numerator)?;
    let e = square_repeatedly(&mut ctx, r, steps)?;
    *output = ctx.unpermute(&e)?;
    Ok(ctx.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessGrid;
    use crate::matrix::TripletList;
    use crate::solver::difference_norm;

    fn symmetric(grid: &ProcessGrid) -> Matrix<f64> {
        let mut list = TripletList::new();
        for i in 0..5 {
            list.push(i, i, -1.0 + 0.5 * i as f64);
            if i + 1 < 5 {
                list.push(i, i + 1, 0.75);
                list.push(i + 1, i, 0.75);
            }
        }
        let mut m = Matrix::new(grid, 5);
        m.fill_from_replicated_triplets(&list).unwrap();
        m
    }

    #[test]
    fn diagonal_exponential() {
        let grid = ProcessGrid::serial();
        let mut a = Matrix::<f64>::new(&grid, 3);
        a.fill_diagonal(&[0.0, 1.0, -3.0]).unwrap();
        let mut e = a.zeros_like();
        compute_exponential(&a, &mut e, &SolverParameters::default().with_threshold(0.0)).unwrap();
        let d = e.to_dense().unwrap();
        assert!((d[(0, 0)] - 1.0).abs() < 1e-13);
        assert!((d[(1, 1)] - 1f64.exp()).abs() < 1e-12);
        assert!((d[(2, 2)] - (-3f64).exp()).abs() < 1e-13);
    }

    #[test]
    fn taylor_and_pade_agree() {
        let grid = ProcessGrid::serial();
        let a = symmetric(&grid);
        let params = SolverParameters::default().with_threshold(0.0).with_converge_diff(1e-12);
        let (mut x, mut y, mut z) = (a.zeros_like(), a.zeros_like(), a.zeros_like());
        compute_exponential(&a, &mut x, &params).unwrap();
        assert!(compute_exponential_pade(&a, &mut y, &params).unwrap().converged);
        compute_dense_exponential(&a, &mut z, &params).unwrap();
        assert!(difference_norm(&x, &y).unwrap() < 1e-9);
        assert!(difference_norm(&x, &z).unwrap() < 1e-12);
    }

    #[test]
    fn pade_coefficients_are_symmetric_in_sign() {
        let c = pade_coefficients(7);
        assert_eq!(c[0], 1.0);
        assert!((c[1] - 0.5).abs() < 1e-15);
        assert!((c[7] - 1.0 / 17_297_280.0).abs() < 1e-20);
        assert_eq!(scaling_steps(3.0, 1.0), 2);
        assert_eq!(scaling_steps(0.25, 0.5), 0);
    }
}
