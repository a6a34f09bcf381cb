//! Matrix sine and cosine.
//!
//! Both come from Taylor series of `A/2^s` (`‖A/2^s‖_F ≤ 1`) followed by
//! `s` double-angle steps: `sin 2X = 2·sin X·cos X`, `cos 2X = 2·cos² X − I`.

use crate::config::SolverParameters;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::{DistributedSparseMatrix, GemmStrategy};
use crate::solver::exponential::scaling_steps;
use crate::solver::polynomial::paterson_stockmeyer;
use crate::solver::{check_output, SolverContext};
use crate::utils::convergence::SolveStats;

type Matrix<T> = DistributedSparseMatrix<T>;

const TAYLOR_DEGREE: usize = 17;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Function {
    Sine,
    Cosine,
}

/// Taylor coefficients of sine (odd degrees) or cosine (even degrees).
fn taylor(function: Function) -> Vec<f64> {
    let parity = match function {
        Function::Sine => 1,
        Function::Cosine => 0,
    };
    let mut factorial = 1.0;
    (0..=TAYLOR_DEGREE)
        .map(|k| {
            if k > 0 {
                factorial *= k as f64;
            }
            if k % 2 != parity {
                0.0
            } else if (k / 2) % 2 == 0 {
                1.0 / factorial
            } else {
                -1.0 / factorial
            }
        })
        .collect()
}

fn trigonometric<T: Scalar>(
    name: &'static str,
    function: Function,
    strategy: GemmStrategy,
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    check_output(input, output)?;
    let mut ctx = SolverContext::new(name, input, params, strategy);
    let a = ctx.permute(input)?;
    let steps = scaling_steps(a.norm(), 1.0);
    let mut x = a.clone();
    x.scale(T::from_real(0.5f64.powi(steps as i32)));

    let mut cos = paterson_stockmeyer(&mut ctx, &x, &taylor(Function::Cosine))?;
    let mut sin = if function == Function::Sine {
        Some(paterson_stockmeyer(&mut ctx, &x, &taylor(Function::Sine))?)
    } else {
        None
    };
    for _ in 0..steps {
        if let Some(s) = sin.as_mut() {
            let sc = ctx.multiply(s, &cos)?;
            *s = sc;
            s.scale(T::from_real(2.0));
        }
        let cc = ctx.multiply(&cos, &cos)?;
        cos = ctx.shift(-1.0, &cc, 2.0)?;
    }

    let result = match (function, sin) {
        (Function::Sine, Some(s)) => s,
        _ => cos,
    };
    *output = ctx.unpermute(&result)?;
    Ok(ctx.finish())
}

pub fn sine<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    trigonometric("sine", Function::Sine, GemmStrategy::Sparse, input, output, params)
}

pub fn cosine<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    trigonometric("cosine", Function::Cosine, GemmStrategy::Sparse, input, output, params)
}

pub fn dense_sine<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    trigonometric("dense_sine", Function::Sine, GemmStrategy::Dense, input, output, params)
}

pub fn dense_cosine<T: Scalar>(
    input: &Matrix<T>,
    output: &mut Matrix<T>,
    params: &SolverParameters,
) -> Result<SolveStats, SpError> {
    trigonometric("dense_cosine", Function::Cosine, GemmStrategy::Dense, input, output, params)
}
