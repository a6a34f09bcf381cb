//! Matrix polynomials in the monomial, Chebyshev and Hermite bases.
//!
//! Coefficients are real; `set_coefficient(k, c)` sets the coefficient of
//! the degree-`k` basis function.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy};
use crate::solver::{check_output, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

fn set_in(coefficients: &mut [f64], degree: usize, value: f64) -> Result<(), SpError> {
    let len = coefficients.len();
    let slot = coefficients.get_mut(degree).ok_or_else(|| {
        SpError::InvalidArgument(format!("degree {degree} outside a polynomial with {len} coefficients"))
    })?;
    *slot = value;
    Ok(())
}

/// `c·I`.
fn scaled_identity<T: Scalar>(like: &Matrix<T>, c: f64) -> Matrix<T> {
    if c == 0.0 {
        return like.zeros_like();
    }
    let mut out = Matrix::identity(like.grid(), like.actual_dimension());
    out.scale(T::from_real(c));
    out
}

/// `p(A)` by Horner's rule.
pub(crate) fn horner<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
    coefficients: &[f64],
) -> Result<Matrix<T>, SpError> {
    let Some((&last, rest)) = coefficients.split_last() else {
        return Ok(a.zeros_like());
    };
    let mut p = scaled_identity(a, last);
    for &c in rest.iter().rev() {
        p = ctx.multiply(&p, a)?;
        p.add_identity(T::from_real(c))?;
    }
    Ok(p)
}

/// `p(A)` by Paterson–Stockmeyer: coefficients are grouped in blocks of
/// `s = ⌈√(n+1)⌉`, each block is a combination of `I, A, …, A^{s-1}`, and the
/// blocks are combined by Horner's rule in `A^s`.
pub(crate) fn paterson_stockmeyer<T: Scalar>(
    ctx: &mut SolverContext<T>,
    a: &Matrix<T>,
    coefficients: &[f64],
) -> Result<Matrix<T>, SpError> {
    let n = coefficients.len();
    if n == 0 {
        return Ok(a.zeros_like());
    }
    let s = (n as f64).sqrt().ceil().max(1.0) as usize;
    let mut powers = Vec::with_capacity(s + 1);
    powers.push(scaled_identity(a, 1.0));
    for k in 1..=s {
        let next = if k == 1 { a.clone() } else { ctx.multiply(&powers[k - 1], a)? };
        powers.push(next);
    }

    let threshold = ctx.threshold();
    let block = |j: usize| -> Result<Matrix<T>, SpError> {
        let mut b = a.zeros_like();
        for (i, &c) in coefficients.iter().skip(j * s).take(s).enumerate() {
            if c != 0.0 {
                b.axpy(T::from_real(c), &powers[i])?;
            }
        }
        b.prune(threshold);
        Ok(b)
    };

    let blocks = n.div_ceil(s);
    let mut p = block(blocks - 1)?;
    for j in (0..blocks - 1).rev() {
        p = ctx.multiply(&p, &powers[s])?;
        p.axpy(T::one(), &block(j)?)?;
    }
    Ok(p)
}

/// Monomial-basis polynomial `Σ c_k A^k`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    /// Polynomial with `num_coefficients` zero coefficients (degree
    /// `num_coefficients - 1`).
    pub fn new(num_coefficients: usize) -> Self {
        Self { coefficients: vec![0.0; num_coefficients] }
    }

    pub fn from_coefficients(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    pub fn set_coefficient(&mut self, degree: usize, value: f64) -> Result<(), SpError> {
        set_in(&mut self.coefficients, degree, value)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    fn run<T: Scalar>(
        &self,
        name: &'static str,
        paterson: bool,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
        params: &SolverParameters,
    ) -> Result<SolveStats, SpError> {
        check_output(input, output)?;
        let mut ctx = SolverContext::new(name, input, params, GemmStrategy::Sparse);
        let a = ctx.permute(input)?;
        let p = if paterson {
            paterson_stockmeyer(&mut ctx, &a, &self.coefficients)?
        } else {
            horner(&mut ctx, &a, &self.coefficients)?
        };
        *output = ctx.unpermute(&p)?;
        Ok(ctx.finish())
    }

    pub fn horner_compute<T: Scalar>(
        &self,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
        params: &SolverParameters,
    ) -> Result<SolveStats, SpError> {
        self.run("horner", false, input, output, params)
    }

    pub fn paterson_stockmeyer_compute<T: Scalar>(
        &self,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
        params: &SolverParameters,
    ) -> Result<SolveStats, SpError> {
        self.run("paterson_stockmeyer", true, input, output, params)
    }
}

/// Chebyshev-basis polynomial `Σ c_k T_k(A)`. The input's spectrum should
/// lie in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChebyshevPolynomial {
    coefficients: Vec<f64>,
}

/// Lazily built `T_k(A)` for the degrees the factorized evaluation needs.
struct ChebyshevCache<T> {
    small: Vec<Matrix<T>>,
    doubled: Vec<(usize, Matrix<T>)>,
}

impl<T: Scalar> ChebyshevCache<T> {
    fn new(a: &Matrix<T>) -> Self {
        Self { small: vec![scaled_identity(a, 1.0), a.clone()], doubled: Vec::new() }
    }

    /// `T_k` for small `k` by the three-term recurrence.
    fn small(&mut self, ctx: &mut SolverContext<T>, k: usize) -> Result<&Matrix<T>, SpError> {
        while self.small.len() <= k {
            let len = self.small.len();
            let next = ctx.multiply(&self.small[1], &self.small[len - 1])?;
            let next = ctx.combine(T::from_real(2.0), &next, -T::one(), &self.small[len - 2])?;
            self.small.push(next);
        }
        Ok(&self.small[k])
    }

    /// `T_m` for a power of two, by `T_{2k} = 2T_k² − I`.
    fn power_of_two(&mut self, ctx: &mut SolverContext<T>, m: usize) -> Result<Matrix<T>, SpError> {
        if m <= 2 {
            return Ok(self.small(ctx, m)?.clone());
        }
        if let Some((_, t)) = self.doubled.iter().find(|(k, _)| *k == m) {
            return Ok(t.clone());
        }
        let half = self.power_of_two(ctx, m / 2)?;
        let squared = ctx.multiply(&half, &half)?;
        let t = ctx.shift(-1.0, &squared, 2.0)?;
        self.doubled.push((m, t.clone()));
        Ok(t)
    }
}

fn chebyshev_direct<T: Scalar>(
    ctx: &mut SolverContext<T>,
    cache: &mut ChebyshevCache<T>,
    like: &Matrix<T>,
    coefficients: &[f64],
) -> Result<Matrix<T>, SpError> {
    let mut sum = like.zeros_like();
    for (k, &c) in coefficients.iter().enumerate() {
        if c != 0.0 {
            let t = cache.small(ctx, k)?;
            sum.axpy(T::from_real(c), t)?;
        }
    }
    sum.prune(ctx.threshold());
    Ok(sum)
}

/// Split `p = L + 2·T_m·H` with `m` a power of two and `2m ≥ deg p`, using
/// `2·T_m·T_k = T_{m+k} + T_{m−k}`, and recurse on both halves.
fn chebyshev_factorized<T: Scalar>(
    ctx: &mut SolverContext<T>,
    cache: &mut ChebyshevCache<T>,
    like: &Matrix<T>,
    coefficients: &[f64],
) -> Result<Matrix<T>, SpError> {
    if coefficients.len() <= 4 {
        return chebyshev_direct(ctx, cache, like, coefficients);
    }
    let n = coefficients.len() - 1;
    let m = n.div_ceil(2).next_power_of_two();
    let mut high = vec![0.0; n - m + 1];
    high[0] = coefficients[m] / 2.0;
    high[1..].copy_from_slice(&coefficients[m + 1..]);
    let mut low = coefficients[..m].to_vec();
    for (k, &h) in high.iter().enumerate().skip(1) {
        low[m - k] -= h;
    }

    let l = chebyshev_factorized(ctx, cache, like, &low)?;
    let h = chebyshev_factorized(ctx, cache, like, &high)?;
    let tm = cache.power_of_two(ctx, m)?;
    let th = ctx.multiply(&tm, &h)?;
    ctx.combine(T::one(), &l, T::from_real(2.0), &th)
}

impl ChebyshevPolynomial {
    pub fn new(num_coefficients: usize) -> Self {
        Self { coefficients: vec![0.0; num_coefficients] }
    }

    pub fn from_coefficients(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    pub fn set_coefficient(&mut self, degree: usize, value: f64) -> Result<(), SpError> {
        set_in(&mut self.coefficients, degree, value)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    fn run<T: Scalar>(
        &self,
        name: &'static str,
        factorized: bool,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
        params: &SolverParameters,
    ) -> Result<SolveStats, SpError> {
        check_output(input, output)?;
        let mut ctx = SolverContext::new(name, input, params, GemmStrategy::Sparse);
        let a = ctx.permute(input)?;
        let mut cache = ChebyshevCache::new(&a);
        let p = if factorized {
            chebyshev_factorized(&mut ctx, &mut cache, &a, &self.coefficients)?
        } else {
            chebyshev_direct(&mut ctx, &mut cache, &a, &self.coefficients)?
        };
        *output = ctx.unpermute(&p)?;
        Ok(ctx.finish())
    }

    /// Three-term recurrence over every degree.
    pub fn compute<T: Scalar>(
        &self,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
        params: &SolverParameters,
    ) -> Result<SolveStats, SpError> {
        self.run("chebyshev", false, input, output, params)
    }

    /// Recursive halving; needs `O(log n)` levels of products instead of `n`.
    pub fn compute_factorized<T: Scalar>(
        &self,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
        params: &SolverParameters,
    ) -> Result<SolveStats, SpError> {
        self.run("chebyshev_factorized", true, input, output, params)
    }
}

/// Physicists' Hermite-basis polynomial `Σ c_k H_k(A)` with
/// `H_{k+1} = 2A·H_k − 2k·H_{k−1}`.
#[derive(Debug, Clone, PartialEq)]
pub struct HermitePolynomial {
    coefficients: Vec<f64>,
}

impl HermitePolynomial {
    pub fn new(num_coefficients: usize) -> Self {
        Self { coefficients: vec![0.0; num_coefficients] }
    }

    pub fn from_coefficients(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    pub fn set_coefficient(&mut self, degree: usize, value: f64) -> Result<(), SpError> {
        set_in(&mut self.coefficients, degree, value)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn compute<T: Scalar>(
        &self,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
        params: &SolverParameters,
    ) -> Result<SolveStats, SpError> {
        check_output(input, output)?;
        let mut ctx = SolverContext::new("hermite", input, params, GemmStrategy::Sparse);
        let a = ctx.permute(input)?;
        let mut sum = scaled_identity(&a, self.coefficients.first().copied().unwrap_or(0.0));
        let mut previous = scaled_identity(&a, 1.0);
        let mut current = a.clone();
        current.scale(T::from_real(2.0));
        for (k, &c) in self.coefficients.iter().enumerate().skip(1) {
            if k > 1 {
                let next = ctx.multiply(&a, &current)?;
                let next = ctx.combine(T::from_real(2.0), &next, T::from_real(-2.0 * (k - 1) as f64), &previous)?;
                previous = std::mem::replace(&mut current, next);
            }
            sum.axpy(T::from_real(c), &current)?;
        }
        sum.prune(ctx.threshold());
        *output = ctx.unpermute(&sum)?;
        Ok(ctx.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessGrid;
    use crate::solver::difference_norm;

    fn diagonal(grid: &ProcessGrid, values: &[f64]) -> Matrix<f64> {
        let mut m = Matrix::new(grid, values.len());
        m.fill_diagonal(values).unwrap();
        m
    }

    fn params() -> SolverParameters {
        SolverParameters::default().with_threshold(0.0)
    }

    #[test]
    fn horner_and_paterson_stockmeyer_agree() {
        let grid = ProcessGrid::serial();
        let a = diagonal(&grid, &[0.5, -0.25, 0.1, 0.9]);
        let poly = Polynomial::from_coefficients(vec![1.0, -2.0, 0.5, 3.0, 0.0, -1.0, 0.25]);
        let (mut x, mut y) = (a.zeros_like(), a.zeros_like());
        poly.horner_compute(&a, &mut x, &params()).unwrap();
        poly.paterson_stockmeyer_compute(&a, &mut y, &params()).unwrap();
        assert!(difference_norm(&x, &y).unwrap() < 1e-13);
        let expected: f64 = poly.coefficients().iter().rev().fold(0.0, |acc, c| acc * 0.5 + c);
        assert!((x.to_dense().unwrap()[(0, 0)] - expected).abs() < 1e-13);
    }

    #[test]
    fn factorized_chebyshev_matches_recurrence() {
        let grid = ProcessGrid::serial();
        let a = diagonal(&grid, &[0.3, -0.7, 0.95, 0.0, -0.1]);
        let coefficients: Vec<f64> = (0..13).map(|k| 1.0 / (1.0 + k as f64)).collect();
        let poly = ChebyshevPolynomial::from_coefficients(coefficients.clone());
        let (mut x, mut y) = (a.zeros_like(), a.zeros_like());
        poly.compute(&a, &mut x, &params()).unwrap();
        poly.compute_factorized(&a, &mut y, &params()).unwrap();
        assert!(difference_norm(&x, &y).unwrap() < 1e-12);
        // T_k(cos θ) = cos(kθ)
        let theta = 0.3f64.acos();
        let expected: f64 = coefficients.iter().enumerate().map(|(k, c)| c * (k as f64 * theta).cos()).sum();
        assert!((x.to_dense().unwrap()[(0, 0)] - expected).abs() < 1e-12);
    }

    #[test]
    fn hermite_basis() {
        let grid = ProcessGrid::serial();
        let a = diagonal(&grid, &[0.5, 2.0]);
        let mut poly = HermitePolynomial::new(4);
        poly.set_coefficient(3, 1.0).unwrap();
        assert!(poly.set_coefficient(4, 1.0).is_err());
        let mut out = a.zeros_like();
        poly.compute(&a, &mut out, &params()).unwrap();
        // H_3(x) = 8x³ − 12x
        let d = out.to_dense().unwrap();
        assert!((d[(0, 0)] - (1.0 - 6.0)).abs() < 1e-13);
        assert!((d[(1, 1)] - (64.0 - 24.0)).abs() < 1e-12);
    }
}
