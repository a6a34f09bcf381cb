//! Core traits and the byte encoding shared by all collectives.

pub mod traits;
pub mod wire;

pub use traits::Scalar;
