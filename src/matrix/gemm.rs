//! Distributed product `C = α·A·B + β·C`.
//!
//! Each process gathers the row stripe of `A` over its row communicator and
//! the column stripe of `B` over its column communicator, restricted to the
//! part of the contraction axis its slice is responsible for. Slice `s`
//! handles `k ∈ [s·N/S, (s+1)·N/S)`; the partial products are then summed
//! over the slice communicator so every slice ends up with the same block.

use std::ops::Range;

use crate::core::traits::Scalar;
use crate::core::wire::{WireReader, WireWriter};
use crate::error::SpError;
use crate::matrix::dense;
use crate::matrix::distributed::DistributedSparseMatrix;
use crate::matrix::sparse::{CsrMatrix, SpaWorkspace};
use crate::parallel::Comm;

/// Local kernel used for the stripe product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GemmStrategy {
    /// Gustavson row-by-row product.
    #[default]
    Sparse,
    /// faer dense product of the stripes.
    Dense,
}

/// Scratch space for repeated products of same-shaped matrices.
///
/// Keyed by (logical dimension, rows, columns, slices); a product with a
/// different key drops the cached workspaces and allocates new ones.
#[derive(Debug)]
pub struct MemoryPool<T> {
    key: Option<(usize, usize, usize, usize)>,
    workspaces: Vec<SpaWorkspace<T>>,
}

impl<T> Default for MemoryPool<T> {
    fn default() -> Self {
        Self { key: None, workspaces: Vec::new() }
    }
}

impl<T: Scalar> MemoryPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether workspaces are currently cached.
    pub fn is_allocated(&self) -> bool {
        self.key.is_some()
    }

    fn workspaces_for(
        &mut self,
        key: (usize, usize, usize, usize),
        width: usize,
    ) -> &mut [SpaWorkspace<T>] {
        if self.key != Some(key) {
            self.workspaces = (0..worker_count()).map(|_| SpaWorkspace::new(width)).collect();
            self.key = Some(key);
        }
        &mut self.workspaces
    }
}

#[cfg(feature = "rayon")]
fn worker_count() -> usize {
    num_cpus::get().max(1)
}

#[cfg(not(feature = "rayon"))]
fn worker_count() -> usize {
    1
}

/// Sparse-kernel product; see [`gemm_with`].
pub fn gemm<T: Scalar>(
    a: &DistributedSparseMatrix<T>,
    b: &DistributedSparseMatrix<T>,
    c: &mut DistributedSparseMatrix<T>,
    alpha: T,
    beta: T,
    threshold: f64,
    pool: &mut MemoryPool<T>,
) -> Result<(), SpError> {
    gemm_with(GemmStrategy::Sparse, a, b, c, alpha, beta, threshold, pool)
}

/// `C = α·A·B + β·C`, flushing entries of the result below `threshold`.
/// Collective over the whole grid.
#[allow(clippy::too_many_arguments)]
pub fn gemm_with<T: Scalar>(
    strategy: GemmStrategy,
    a: &DistributedSparseMatrix<T>,
    b: &DistributedSparseMatrix<T>,
    c: &mut DistributedSparseMatrix<T>,
    alpha: T,
    beta: T,
    threshold: f64,
    pool: &mut MemoryPool<T>,
) -> Result<(), SpError> {
    a.check_compatible(b)?;
    a.check_compatible(c)?;
    let grid = a.grid().clone();
    let n = a.logical_dimension();
    let (rows, columns, slices) = (grid.num_rows(), grid.num_columns(), grid.num_slices());
    let contraction = {
        let s = grid.my_slice();
        s * n / slices..(s + 1) * n / slices
    };

    // A: my block rows, the slice's contraction columns
    let a_stripe = gather_stripe(
        grid.row_comm(),
        a.local_block(),
        a.start_column(),
        &contraction,
        Axis::Columns,
    )?;
    // B: the slice's contraction rows, my block columns
    let b_stripe = gather_stripe(
        grid.column_comm(),
        b.local_block(),
        b.start_row(),
        &contraction,
        Axis::Rows,
    )?;

    let mut partial = match strategy {
        GemmStrategy::Sparse => {
            let ws = pool.workspaces_for((n, rows, columns, slices), b_stripe.ncols());
            a_stripe.multiply(&b_stripe, 0.0, ws)?
        }
        GemmStrategy::Dense => {
            let product = dense::matmul(a_stripe.to_dense().as_ref(), b_stripe.to_dense().as_ref());
            CsrMatrix::from_dense(product.as_ref(), 0.0)
        }
    };

    if slices > 1 {
        let parts = grid.slice_comm().all_gather_bytes(&partial.to_bytes());
        let mut sum = CsrMatrix::zeros(partial.nrows(), partial.ncols());
        for bytes in &parts {
            let part = CsrMatrix::from_bytes(bytes)?;
            sum = CsrMatrix::axpby(T::one(), &sum, T::one(), &part, 0.0)?;
        }
        partial = sum;
    }

    let result = CsrMatrix::axpby(alpha, &partial, beta, c.local_block(), threshold)?;
    c.set_local_block(result);
    Ok(())
}

#[derive(Clone, Copy)]
enum Axis {
    Rows,
    Columns,
}

/// Gather the pieces of a stripe that fall in `contraction` from every
/// member of `comm`. `start` is this process's first global index along the
/// gathered axis.
fn gather_stripe<T: Scalar>(
    comm: &impl Comm,
    block: &CsrMatrix<T>,
    start: usize,
    contraction: &Range<usize>,
    axis: Axis,
) -> Result<CsrMatrix<T>, SpError> {
    let extent = match axis {
        Axis::Columns => block.ncols(),
        Axis::Rows => block.nrows(),
    };
    let lo = start.max(contraction.start);
    let hi = (start + extent).min(contraction.end).max(lo);
    let local = if lo < hi { lo - start..hi - start } else { 0..0 };
    let piece = match axis {
        Axis::Columns => block.select(0..block.nrows(), local),
        Axis::Rows => block.select(local, 0..block.ncols()),
    };

    let mut w = WireWriter::new();
    w.put_usize(lo.saturating_sub(contraction.start).min(contraction.len()));
    piece.encode(&mut w);
    let mut parts = Vec::with_capacity(comm.size());
    for bytes in comm.all_gather_bytes(&w.into_bytes()) {
        let mut r = WireReader::new(&bytes);
        let offset = r.get_usize()?;
        parts.push((offset, CsrMatrix::decode(&mut r)?));
    }

    let width = contraction.len();
    match axis {
        Axis::Columns => Ok(CsrMatrix::hstack(block.nrows(), width, &parts)),
        Axis::Rows => CsrMatrix::vstack(width, block.ncols(), &parts),
    }
}

/// A gemm strategy bundled with its pool and flush threshold.
#[derive(Debug)]
pub struct Multiplier<T> {
    strategy: GemmStrategy,
    threshold: f64,
    pool: MemoryPool<T>,
}

impl<T: Scalar> Multiplier<T> {
    pub fn new(strategy: GemmStrategy, threshold: f64) -> Self {
        Self { strategy, threshold, pool: MemoryPool::new() }
    }

    pub fn strategy(&self) -> GemmStrategy {
        self.strategy
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `a · b` as a new matrix.
    pub fn multiply(
        &mut self,
        a: &DistributedSparseMatrix<T>,
        b: &DistributedSparseMatrix<T>,
    ) -> Result<DistributedSparseMatrix<T>, SpError> {
        let mut out = a.zeros_like();
        self.multiply_into(a, b, &mut out, T::one(), T::zero())?;
        Ok(out)
    }

    /// `c = α·a·b + β·c`.
    pub fn multiply_into(
        &mut self,
        a: &DistributedSparseMatrix<T>,
        b: &DistributedSparseMatrix<T>,
        c: &mut DistributedSparseMatrix<T>,
        alpha: T,
        beta: T,
    ) -> Result<(), SpError> {
        gemm_with(self.strategy, a, b, c, alpha, beta, self.threshold, &mut self.pool)
    }

    /// `α·a + β·b`, flushed with this multiplier's threshold.
    pub fn combine(
        &self,
        alpha: T,
        a: &DistributedSparseMatrix<T>,
        beta: T,
        b: &DistributedSparseMatrix<T>,
    ) -> Result<DistributedSparseMatrix<T>, SpError> {
        DistributedSparseMatrix::linear_combination(alpha, a, beta, b, self.threshold)
    }
}
