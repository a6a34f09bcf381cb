//! Density matrices by purification.
//!
//! Given a Hamiltonian `H` and the inverse square root `S^{-1/2}` of the
//! overlap matrix, purification drives `X₀ = f(H_o)`, with
//! `H_o = S^{-1/2}·H·S^{-1/2}`, to the projector onto the `occupied` lowest
//! states by one of TRS2, TRS4, PM or HPCP. Every step applies the same scalar polynomial to all
//! eigenvalues, so the sequence of polynomials is recorded and the
//! chemical potential is recovered afterwards by bisection on the point
//! where the composed map crosses ½.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy};
use crate::solver::{check_output, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

/// Outcome of a purification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityResult {
    pub stats: SolveStats,
    /// `tr(X·H_o)`.
    pub energy: f64,
    pub chemical_potential: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Purification {
    Trs2,
    Trs4,
    Pm,
    Hpcp,
}

/// One recorded step of the scalar map.
#[derive(Debug, Clone, Copy)]
enum Step {
    Square,
    Double,
    Trs4(f64),
    Pm(f64),
    Hpcp(f64),
}

impl Step {
    fn apply(self, x: f64) -> f64 {
        let x2 = x * x;
        match self {
            Step::Square => x2,
            Step::Double => 2.0 * x - x2,
            Step::Trs4(gamma) => x2 * (4.0 * x - 3.0 * x2) + gamma * x2 * (1.0 - x) * (1.0 - x),
            Step::Pm(c) if c >= 0.5 => ((1.0 + c) * x2 - x2 * x) / c,
            Step::Pm(c) => ((1.0 - 2.0 * c) * x + (1.0 + c) * x2 - x2 * x) / (1.0 - c),
            Step::Hpcp(c) => x + 2.0 * (x2 - x2 * x) - 2.0 * c * (x - x2),
        }
    }
}

const TINY: f64 = 1e-14;

/// Purify an orthogonalized Hamiltonian. Returns the projector and the
/// chemical potential.
pub(crate) fn purify<T: Scalar>(
    ctx: &mut SolverContext<T>,
    ho: &Matrix<T>,
    occupied: usize,
    method: Purification,
) -> Result<(Matrix<T>, f64), SpError> {
    let n = ho.actual_dimension() as f64;
    let ne = occupied as f64;
    let canonical = matches!(method, Purification::Pm | Purification::Hpcp);
    if occupied > ho.actual_dimension() || (canonical && (occupied == 0 || ne >= n)) {
        return Err(SpError::InvalidArgument(format!(
            "{occupied} occupied states for dimension {}",
            ho.actual_dimension()
        )));
    }
    let (mut e_min, mut e_max) = ho.gershgorin_bounds();
    if e_max - e_min < TINY {
        e_min -= 1.0;
        e_max += 1.0;
    }

    // X₀ = α·I + β·H_o
    let (alpha, beta) = match method {
        Purification::Trs2 | Purification::Trs4 => (e_max / (e_max - e_min), -1.0 / (e_max - e_min)),
        Purification::Pm | Purification::Hpcp => {
            let mu_bar = ho.trace().real() / n;
            let lambda = (ne / (e_max - mu_bar).max(TINY)).min((n - ne) / (mu_bar - e_min).max(TINY));
            (lambda / n * mu_bar + ne / n, -lambda / n)
        }
    };
    let mut x = ctx.shift(alpha, ho, beta)?;

    let mut steps = Vec::new();
    while ctx.is_running() {
        let x2 = ctx.multiply(&x, &x)?;
        let (tr_x, tr_x2) = (x.trace().real(), x2.trace().real());
        let residual = (tr_x - tr_x2).abs();
        if residual <= TINY {
            ctx.step(residual);
            break;
        }
        let step = match method {
            Purification::Trs2 => {
                if (tr_x2 - ne).abs() < (2.0 * tr_x - tr_x2 - ne).abs() {
                    Step::Square
                } else {
                    Step::Double
                }
            }
            Purification::Trs4 => {
                // F = X²(4X − 3X²), G = X²(I − X)²
                let four_three = ctx.combine(T::from_real(4.0), &x, T::from_real(-3.0), &x2)?;
                let f = ctx.multiply(&x2, &four_three)?;
                let mut one_minus = ctx.combine(T::from_real(-2.0), &x, T::one(), &x2)?;
                one_minus.add_identity(T::one())?;
                let g = ctx.multiply(&x2, &one_minus)?;
                let tr_g = g.trace().real();
                let gamma = if tr_g.abs() < TINY { 0.0 } else { (ne - f.trace().real()) / tr_g };
                if gamma > 6.0 {
                    Step::Double
                } else if gamma < 0.0 {
                    Step::Square
                } else {
                    x = ctx.combine(T::one(), &f, T::from_real(gamma), &g)?;
                    steps.push(Step::Trs4(gamma));
                    ctx.step(residual);
                    continue;
                }
            }
            Purification::Pm => {
                let x3 = ctx.multiply(&x2, &x)?;
                let c = (tr_x2 - x3.trace().real()) / (tr_x - tr_x2);
                let next = if c >= 0.5 {
                    let mut y = ctx.combine(T::from_real(1.0 + c), &x2, -T::one(), &x3)?;
                    y.scale(T::from_real(1.0 / c));
                    y
                } else {
                    let mut y = ctx.combine(T::from_real(1.0 + c), &x2, -T::one(), &x3)?;
                    y.axpy(T::from_real(1.0 - 2.0 * c), &x)?;
                    y.scale(T::from_real(1.0 / (1.0 - c)));
                    y
                };
                x = next;
                steps.push(Step::Pm(c));
                ctx.step(residual);
                continue;
            }
            Purification::Hpcp => {
                // X + 2(X²H − c·XH) with the hole part H = I − X
                let x3 = ctx.multiply(&x2, &x)?;
                let c = (tr_x2 - x3.trace().real()) / (tr_x - tr_x2);
                let mut y = ctx.combine(T::from_real(2.0 + 2.0 * c), &x2, T::from_real(-2.0), &x3)?;
                y.axpy(T::from_real(1.0 - 2.0 * c), &x)?;
                x = y;
                steps.push(Step::Hpcp(c));
                ctx.step(residual);
                continue;
            }
        };
        x = match step {
            Step::Square => x2,
            _ => ctx.combine(T::from_real(2.0), &x, -T::one(), &x2)?,
        };
        steps.push(step);
        ctx.step(residual);
    }

    let start = |e: f64| alpha + beta * e;
    let occupation = |e: f64| steps.iter().fold(start(e), |v, s| s.apply(v));
    let (mut lo, mut hi) = (e_min, e_max);
    for _ in 0..64 {
        let mid = 0.5 * (lo + hi);
        if occupation(mid) > 0.5 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok((x, 0.5 * (lo + hi)))
}

fn density_with<T: Scalar>(
    name: &'static str,
    method: Purification,
    hamiltonian: &Matrix<T>,
    inverse_square_root: &Matrix<T>,
    occupied: usize,
    density: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<DensityResult, SpError> {
    check_output(hamiltonian, inverse_square_root)?;
    check_output(hamiltonian, density)?;
    let mut ctx = SolverContext::new(name, hamiltonian, params, GemmStrategy::Sparse);
    let h = ctx.permute(hamiltonian)?;
    let isq = ctx.permute(inverse_square_root)?;

    let ho = ctx.multiply(&isq, &h)?;
    let ho = ctx.multiply(&ho, &isq)?;
    let (x, chemical_potential) = purify(&mut ctx, &ho, occupied, method)?;
    let energy = x.dot(&ho)?.real();

    let k = ctx.multiply(&isq, &x)?;
    let k = ctx.multiply(&k, &isq)?;
    *density = ctx.unpermute(&k)?;
    if params.verbose && hamiltonian.grid().is_root() {
        tracing::info!(energy, chemical_potential, "density");
    }
    Ok(DensityResult { stats: ctx.finish(), energy, chemical_potential })
}

/// Second-order trace-resetting purification.
pub fn trs2<T: Scalar>(
    hamiltonian: &Matrix<T>,
    inverse_square_root: &Matrix<T>,
    occupied: usize,
    density: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<DensityResult, SpError> {
    density_with("trs2", Purification::Trs2, hamiltonian, inverse_square_root, occupied, density, params)
}

/// Fourth-order trace-resetting purification.
pub fn trs4<T: Scalar>(
    hamiltonian: &Matrix<T>,
    inverse_square_root: &Matrix<T>,
    occupied: usize,
    density: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<DensityResult, SpError> {
    density_with("trs4", Purification::Trs4, hamiltonian, inverse_square_root, occupied, density, params)
}

/// Canonical Palser–Manolopoulos purification. Needs
/// `0 < occupied < dimension`.
pub fn pm<T: Scalar>(
    hamiltonian: &Matrix<T>,
    inverse_square_root: &Matrix<T>,
    occupied: usize,
    density: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<DensityResult, SpError> {
    density_with("pm", Purification::Pm, hamiltonian, inverse_square_root, occupied, density, params)
}

/// Hole-particle canonical purification. Needs `0 < occupied < dimension`.
pub fn hpcp<T: Scalar>(
    hamiltonian: &Matrix<T>,
    inverse_square_root: &Matrix<T>,
    occupied: usize,
    density: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<DensityResult, SpError> {
    density_with("hpcp", Purification::Hpcp, hamiltonian, inverse_square_root, occupied, density, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessGrid;
    use crate::matrix::TripletList;

    /// Four states in [-2.1, -1.35], four in [2.25, 3.0].
    fn gapped(grid: &ProcessGrid) -> Matrix<f64> {
        let mut list = TripletList::new();
        for i in 0..8 {
            list.push(i, i, if i < 4 { -2.0 + 0.2 * i as f64 } else { 1.5 + 0.2 * i as f64 });
            if i + 1 < 8 {
                list.push(i, i + 1, 0.1);
                list.push(i + 1, i, 0.1);
            }
        }
        let mut m = Matrix::new(grid, 8);
        m.fill_from_replicated_triplets(&list).unwrap();
        m
    }

    #[test]
    fn every_method_finds_the_same_projector() {
        let grid = ProcessGrid::serial();
        let h = gapped(&grid);
        let isq = Matrix::identity(&grid, 8);
        let params = SolverParameters::default().with_threshold(0.0).with_converge_diff(1e-10);
        let mut results = Vec::new();
        for method in [trs2::<f64>, trs4::<f64>, pm::<f64>, hpcp::<f64>] {
            let mut k = h.zeros_like();
            let r = method(&h, &isq, 4, &mut k, &params).unwrap();
            assert!(r.stats.converged);
            assert!((k.trace() - 4.0).abs() < 1e-8);
            assert!(r.chemical_potential > -1.36 && r.chemical_potential < 2.26);
            results.push((k, r.energy));
        }
        let (k0, e0) = &results[0];
        for (k, e) in &results[1..] {
            assert!(crate::solver::difference_norm(k0, k).unwrap() < 1e-6);
            assert!((e0 - e).abs() < 1e-6);
        }
    }

    #[test]
    fn occupation_must_fit() {
        let grid = ProcessGrid::serial();
        let h = gapped(&grid);
        let isq = Matrix::identity(&grid, 8);
        let mut k = h.zeros_like();
        assert!(trs2(&h, &isq, 9, &mut k, &SolverParameters::default()).is_err());
        assert!(pm(&h, &isq, 0, &mut k, &SolverParameters::default()).is_err());
        assert!(hpcp(&h, &isq, 8, &mut k, &SolverParameters::default()).is_err());
    }

    #[test]
    fn scalar_maps_fix_the_ends() {
        for step in [Step::Square, Step::Double, Step::Trs4(2.0), Step::Pm(0.7), Step::Pm(0.2), Step::Hpcp(0.4)] {
            assert!((step.apply(0.0)).abs() < 1e-15);
            assert!((step.apply(1.0) - 1.0).abs() < 1e-15);
        }
    }
}
