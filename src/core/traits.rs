//! Core scalar and linear-algebra traits for sparsefn.

use faer::traits::ComplexField;
use num_complex::Complex64;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

/// Element type of a distributed matrix: `f64` or `Complex64`.
///
/// The `ComplexField` bound lets the dense fallbacks hand local data to faer
/// unchanged.
pub trait Scalar:
    ComplexField
    + num_traits::Zero
    + num_traits::One
    + Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + 'static
{
    /// Whether values carry an imaginary part.
    const IS_COMPLEX: bool;
    /// Number of `f64` words used to encode a value.
    const WORDS: usize;

    fn from_real(re: f64) -> Self;
    fn from_parts(re: f64, im: f64) -> Self;
    fn real(self) -> f64;
    fn imag(self) -> f64;
    fn conjugate(self) -> Self;
    /// |x|²
    fn modulus_sqr(self) -> f64;

    /// |x|
    fn modulus(self) -> f64 {
        self.modulus_sqr().sqrt()
    }

    /// Multiply by a real factor.
    fn scale_by(self, factor: f64) -> Self {
        self * Self::from_real(factor)
    }

    /// Append the `WORDS` encoding of this value.
    fn push_words(self, out: &mut Vec<f64>) {
        out.push(self.real());
        if Self::IS_COMPLEX {
            out.push(self.imag());
        }
    }

    /// Decode from exactly `WORDS` words.
    fn from_words(words: &[f64]) -> Self {
        if Self::IS_COMPLEX {
            Self::from_parts(words[0], words[1])
        } else {
            Self::from_real(words[0])
        }
    }
}

impl Scalar for f64 {
    const IS_COMPLEX: bool = false;
    const WORDS: usize = 1;

    fn from_real(re: f64) -> Self {
        re
    }
    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }
    fn real(self) -> f64 {
        self
    }
    fn imag(self) -> f64 {
        0.0
    }
    fn conjugate(self) -> Self {
        self
    }
    fn modulus_sqr(self) -> f64 {
        self * self
    }
    fn modulus(self) -> f64 {
        self.abs()
    }
}

impl Scalar for Complex64 {
    const IS_COMPLEX: bool = true;
    const WORDS: usize = 2;

    fn from_real(re: f64) -> Self {
        Complex64::new(re, 0.0)
    }
    fn from_parts(re: f64, im: f64) -> Self {
        Complex64::new(re, im)
    }
    fn real(self) -> f64 {
        self.re
    }
    fn imag(self) -> f64 {
        self.im
    }
    fn conjugate(self) -> Self {
        Complex64::new(self.re, -self.im)
    }
    fn modulus_sqr(self) -> f64 {
        self.re * self.re + self.im * self.im
    }
}
