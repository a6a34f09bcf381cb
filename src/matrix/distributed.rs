//! Sparse matrix distributed over a [`ProcessGrid`].
//!
//! The logical dimension `N` is the actual (user visible) dimension rounded
//! up to a multiple of `lcm(R, C)`. The process at grid row `r` and column
//! `c` owns global rows `[r·N/R, (r+1)·N/R)` and columns
//! `[c·N/C, (c+1)·N/C)`; every slice holds an identical replica. Indices at
//! or beyond the actual dimension are padding and always stay empty.

use faer::{Mat, MatRef};

use crate::context::{global_grid, ProcessGrid};
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::gemm::{gemm, MemoryPool};
use crate::matrix::sparse::CsrMatrix;
use crate::matrix::triplet::{Triplet, TripletList};
use crate::parallel::Comm;

#[derive(Clone, Debug)]
pub struct DistributedSparseMatrix<T> {
    grid: ProcessGrid,
    actual: usize,
    logical: usize,
    local: CsrMatrix<T>,
}

impl<T: Scalar> DistributedSparseMatrix<T> {
    /// Zero matrix of the given dimension.
    pub fn new(grid: &ProcessGrid, dimension: usize) -> Self {
        let logical = grid.logical_dimension(dimension);
        let local = CsrMatrix::zeros(logical / grid.num_rows(), logical / grid.num_columns());
        Self { grid: grid.clone(), actual: dimension, logical, local }
    }

    /// Zero matrix on the current grid.
    pub fn with_global_grid(dimension: usize) -> Result<Self, SpError> {
        Ok(Self::new(&global_grid()?, dimension))
    }

    pub fn identity(grid: &ProcessGrid, dimension: usize) -> Self {
        let mut m = Self::new(grid, dimension);
        m.fill_identity();
        m
    }

    /// Zero matrix with the same grid and dimension.
    pub fn zeros_like(&self) -> Self {
        Self::new(&self.grid, self.actual)
    }

    pub fn grid(&self) -> &ProcessGrid {
        &self.grid
    }

    pub fn actual_dimension(&self) -> usize {
        self.actual
    }

    pub fn logical_dimension(&self) -> usize {
        self.logical
    }

    pub fn local_block(&self) -> &CsrMatrix<T> {
        &self.local
    }

    pub(crate) fn set_local_block(&mut self, local: CsrMatrix<T>) {
        debug_assert_eq!((local.nrows(), local.ncols()), (self.local.nrows(), self.local.ncols()));
        self.local = local;
    }

    pub fn start_row(&self) -> usize {
        self.grid.my_row() * self.block_rows()
    }

    pub fn end_row(&self) -> usize {
        self.start_row() + self.block_rows()
    }

    pub fn start_column(&self) -> usize {
        self.grid.my_column() * self.block_columns()
    }

    pub fn end_column(&self) -> usize {
        self.start_column() + self.block_columns()
    }

    pub(crate) fn block_rows(&self) -> usize {
        self.logical / self.grid.num_rows()
    }

    pub(crate) fn block_columns(&self) -> usize {
        self.logical / self.grid.num_columns()
    }

    fn owns(&self, row: usize, column: usize) -> bool {
        (self.start_row()..self.end_row()).contains(&row)
            && (self.start_column()..self.end_column()).contains(&column)
    }

    /// Same grid and same dimension, or `DimensionMismatch`.
    pub fn check_compatible(&self, other: &Self) -> Result<(), SpError> {
        if !self.grid.same_as(&other.grid) {
            return Err(SpError::DimensionMismatch(
                "matrices live on different process grids".to_string(),
            ));
        }
        if self.actual != other.actual {
            return Err(SpError::DimensionMismatch(format!(
                "dimensions {} and {}",
                self.actual, other.actual
            )));
        }
        Ok(())
    }

    /// Make a locally detected error visible on every process of the grid.
    pub(crate) fn agree(&self, local: Result<(), SpError>) -> Result<(), SpError> {
        let flag = if local.is_err() { 1.0 } else { 0.0 };
        if self.grid.world().all_reduce_max(flag) > 0.0 {
            Err(local.err().unwrap_or_else(|| {
                SpError::DimensionMismatch("rejected on another process".to_string())
            }))
        } else {
            Ok(())
        }
    }

    fn check_bounds(&self, list: &TripletList<T>) -> Result<(), SpError> {
        match list.iter().find(|t| t.row >= self.actual || t.column >= self.actual) {
            Some(t) => Err(SpError::DimensionMismatch(format!(
                "entry ({}, {}) outside a {}x{} matrix",
                t.row, t.column, self.actual, self.actual
            ))),
            None => Ok(()),
        }
    }

    /// Send every triplet to its owner within this slice.
    fn route_within_slice(&self, list: &TripletList<T>) -> Result<TripletList<T>, SpError> {
        let comm = self.grid.within_slice_comm();
        let mut buckets: Vec<TripletList<T>> = vec![TripletList::new(); comm.size()];
        for t in list {
            buckets[self.grid.owner_of(t.row, t.column, self.logical)].append(*t);
        }
        let incoming = comm.all_to_all_bytes(buckets.iter().map(TripletList::to_bytes).collect());
        let mut received = TripletList::new();
        for bytes in &incoming {
            received.extend(TripletList::from_bytes(bytes)?);
        }
        Ok(received)
    }

    fn build_local(&mut self, owned: TripletList<T>) -> Result<(), SpError> {
        let (sr, sc) = (self.start_row(), self.start_column());
        let entries = owned
            .into_iter()
            .map(|t| (t.row - sr, t.column - sc, t.value))
            .collect();
        self.local = CsrMatrix::from_entries(self.block_rows(), self.block_columns(), entries)?;
        Ok(())
    }

    /// Replace the contents with the sum of every process's triplets.
    /// Each process may contribute any entries; duplicates accumulate.
    pub fn fill_from_triplet_list(&mut self, list: &TripletList<T>) -> Result<(), SpError> {
        self.agree(self.check_bounds(list))?;
        let mut owned = self.route_within_slice(list)?;
        if self.grid.num_slices() > 1 {
            let parts = self.grid.slice_comm().all_gather_bytes(&owned.to_bytes());
            owned = TripletList::new();
            for bytes in &parts {
                owned.extend(TripletList::from_bytes(bytes)?);
            }
        }
        self.build_local(owned)
    }

    /// Like [`fill_from_triplet_list`](Self::fill_from_triplet_list), but
    /// every slice already holds the full set of triplets, so nothing is
    /// summed across slices.
    pub fn fill_from_triplet_list_preduplicated(
        &mut self,
        list: &TripletList<T>,
    ) -> Result<(), SpError> {
        self.agree(self.check_bounds(list))?;
        let owned = self.route_within_slice(list)?;
        self.build_local(owned)
    }

    /// Replace the contents from a list that is identical on every process.
    /// No communication.
    pub fn fill_from_replicated_triplets(&mut self, list: &TripletList<T>) -> Result<(), SpError> {
        self.check_bounds(list)?;
        let owned = list.iter().filter(|t| self.owns(t.row, t.column)).copied().collect();
        self.build_local(owned)
    }

    pub fn fill_identity(&mut self) {
        self.fill_diagonal_with(|_| T::one());
    }

    /// Set the diagonal to `values` (length = actual dimension), clearing
    /// everything else.
    pub fn fill_diagonal(&mut self, values: &[T]) -> Result<(), SpError> {
        if values.len() != self.actual {
            return Err(SpError::DimensionMismatch(format!(
                "{} diagonal values for dimension {}",
                values.len(),
                self.actual
            )));
        }
        self.fill_diagonal_with(|i| values[i]);
        Ok(())
    }

    fn fill_diagonal_with<F: Fn(usize) -> T>(&mut self, value: F) {
        let (sr, sc) = (self.start_row(), self.start_column());
        let lo = sr.max(sc);
        let hi = self.end_row().min(self.end_column()).min(self.actual).max(lo);
        self.local = CsrMatrix::diagonal(
            self.block_rows(),
            self.block_columns(),
            lo - sr..hi - sr,
            sr as isize - sc as isize,
            |r| value(r + sr),
        );
    }

    /// This process's entries in global coordinates (every slice).
    pub(crate) fn local_triplets(&self) -> TripletList<T> {
        let (sr, sc) = (self.start_row(), self.start_column());
        self.local
            .iter()
            .map(|(i, j, v)| Triplet::new(i + sr, j + sc, v))
            .collect()
    }

    /// This process's entries in global coordinates. Only slice 0 returns
    /// data so replicas are not reported twice.
    pub fn get_triplet_list(&self) -> TripletList<T> {
        if self.grid.my_slice() == 0 {
            self.local_triplets()
        } else {
            TripletList::new()
        }
    }

    /// Every entry with row in `[row_start, row_end)` and column in
    /// `[column_start, column_end)`, in global coordinates and row-major
    /// order. Collective; each process may ask for a different block.
    pub fn get_matrix_block(
        &self,
        row_start: usize,
        row_end: usize,
        column_start: usize,
        column_end: usize,
    ) -> Result<TripletList<T>, SpError> {
        let check = if row_start > row_end
            || column_start > column_end
            || row_end > self.actual
            || column_end > self.actual
        {
            Err(SpError::DimensionMismatch(format!(
                "block [{row_start}, {row_end}) x [{column_start}, {column_end}) outside dimension {}",
                self.actual
            )))
        } else {
            Ok(())
        };
        self.agree(check)?;

        let comm = self.grid.within_slice_comm();
        let mut request = Vec::with_capacity(32);
        for v in [row_start, row_end, column_start, column_end] {
            request.extend_from_slice(&(v as u64).to_le_bytes());
        }
        let requests = comm.all_gather_bytes(&request);
        let mine = self.local_triplets();
        let mut outgoing = Vec::with_capacity(requests.len());
        for req in &requests {
            let mut r = crate::core::wire::WireReader::new(req);
            let (rs, re, cs, ce) = (r.get_usize()?, r.get_usize()?, r.get_usize()?, r.get_usize()?);
            let part: TripletList<T> = mine
                .iter()
                .filter(|t| (rs..re).contains(&t.row) && (cs..ce).contains(&t.column))
                .copied()
                .collect();
            outgoing.push(part.to_bytes());
        }
        let mut block = TripletList::new();
        for bytes in &comm.all_to_all_bytes(outgoing) {
            block.extend(TripletList::from_bytes(bytes)?);
        }
        block.sort();
        Ok(block)
    }

    /// New matrix holding rows `row_start..=row_end` and columns
    /// `column_start..=column_end` at the origin, zero padded to a square of
    /// the larger span.
    pub fn get_matrix_slice(
        &self,
        row_start: usize,
        row_end: usize,
        column_start: usize,
        column_end: usize,
    ) -> Result<Self, SpError> {
        if row_start > row_end
            || column_start > column_end
            || row_end >= self.actual
            || column_end >= self.actual
        {
            return Err(SpError::DimensionMismatch(format!(
                "slice [{row_start}, {row_end}] x [{column_start}, {column_end}] outside dimension {}",
                self.actual
            )));
        }
        let dimension = (row_end - row_start + 1).max(column_end - column_start + 1);
        let shifted: TripletList<T> = self
            .local_triplets()
            .into_iter()
            .filter(|t| {
                (row_start..=row_end).contains(&t.row) && (column_start..=column_end).contains(&t.column)
            })
            .map(|t| Triplet::new(t.row - row_start, t.column - column_start, t.value))
            .collect();
        let mut out = Self::new(&self.grid, dimension);
        out.fill_from_triplet_list_preduplicated(&shifted)?;
        Ok(out)
    }

    pub fn transpose(&self) -> Result<Self, SpError> {
        let flipped: TripletList<T> = self
            .local_triplets()
            .into_iter()
            .map(|t| Triplet::new(t.column, t.row, t.value))
            .collect();
        let mut out = self.zeros_like();
        out.fill_from_triplet_list_preduplicated(&flipped)?;
        Ok(out)
    }

    /// Negate imaginary parts in place.
    pub fn conjugate(&mut self) {
        self.local.conjugate_in_place();
    }

    /// Conjugate transpose.
    pub fn adjoint(&self) -> Result<Self, SpError> {
        let mut out = self.transpose()?;
        out.conjugate();
        Ok(out)
    }

    pub fn scale(&mut self, alpha: T) {
        self.local.scale(alpha);
    }

    /// `self += alpha · other`.
    pub fn axpy(&mut self, alpha: T, other: &Self) -> Result<(), SpError> {
        self.check_compatible(other)?;
        self.local = CsrMatrix::axpby(T::one(), &self.local, alpha, &other.local, 0.0)?;
        Ok(())
    }

    /// `alpha·a + beta·b` as a new matrix, dropping entries below `threshold`.
    pub fn linear_combination(
        alpha: T,
        a: &Self,
        beta: T,
        b: &Self,
        threshold: f64,
    ) -> Result<Self, SpError> {
        a.check_compatible(b)?;
        let mut out = a.zeros_like();
        out.local = CsrMatrix::axpby(alpha, &a.local, beta, &b.local, threshold)?;
        Ok(out)
    }

    /// `self += alpha · I`.
    pub fn add_identity(&mut self, alpha: T) -> Result<(), SpError> {
        let mut eye = self.zeros_like();
        eye.fill_diagonal_with(|_| alpha);
        self.local = CsrMatrix::axpby(T::one(), &self.local, T::one(), &eye.local, 0.0)?;
        Ok(())
    }

    /// Drop entries with magnitude below `threshold`.
    pub fn prune(&mut self, threshold: f64) {
        self.local.prune(threshold);
    }

    fn sum_scalar(&self, local: T) -> T {
        let mut parts = [local.real(), local.imag()];
        self.grid.within_slice_comm().all_reduce_sum_vec(&mut parts);
        T::from_parts(parts[0], parts[1])
    }

    pub fn trace(&self) -> T {
        let (sr, sc) = (self.start_row(), self.start_column());
        let local = self
            .local
            .iter()
            .filter(|&(i, j, _)| i + sr == j + sc)
            .fold(T::zero(), |acc, (_, _, v)| acc + v);
        self.sum_scalar(local)
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.grid
            .within_slice_comm()
            .all_reduce_sum(self.local.frobenius_sqr())
            .sqrt()
    }

    pub fn max_abs(&self) -> f64 {
        self.grid.within_slice_comm().all_reduce_max(self.local.max_abs())
    }

    /// Frobenius inner product `Σ conj(self_ij) · other_ij`.
    pub fn dot(&self, other: &Self) -> Result<T, SpError> {
        self.check_compatible(other)?;
        let local = self
            .local
            .iter()
            .fold(T::zero(), |acc, (i, j, v)| acc + v.conjugate() * other.local.get(i, j));
        Ok(self.sum_scalar(local))
    }

    /// Global number of stored entries.
    pub fn nnz(&self) -> usize {
        self.grid.within_slice_comm().all_reduce_sum(self.local.nnz() as f64) as usize
    }

    /// Gershgorin estimate `(lower, upper)` of the spectrum of a Hermitian
    /// matrix.
    pub fn gershgorin_bounds(&self) -> (f64, f64) {
        let rows = self.block_rows();
        let (sr, sc) = (self.start_row(), self.start_column());
        // [center, radius] per local row
        let mut acc = vec![0.0; 2 * rows];
        for (i, j, v) in self.local.iter() {
            if i + sr == j + sc {
                acc[2 * i] += v.real();
            } else {
                acc[2 * i + 1] += v.modulus();
            }
        }
        self.grid.row_comm().all_reduce_sum_vec(&mut acc);
        let mut lower = f64::INFINITY;
        let mut upper = f64::NEG_INFINITY;
        for i in (0..rows).filter(|i| i + sr < self.actual) {
            lower = lower.min(acc[2 * i] - acc[2 * i + 1]);
            upper = upper.max(acc[2 * i] + acc[2 * i + 1]);
        }
        let columns = self.grid.column_comm();
        (-columns.all_reduce_max(-lower), columns.all_reduce_max(upper))
    }

    /// Gather the whole matrix onto every process.
    pub fn to_dense(&self) -> Result<Mat<T>, SpError> {
        let parts = self
            .grid
            .within_slice_comm()
            .all_gather_bytes(&self.local_triplets().to_bytes());
        let mut dense = Mat::<T>::zeros(self.actual, self.actual);
        for bytes in &parts {
            for t in TripletList::<T>::from_bytes(bytes)? {
                dense[(t.row, t.column)] = t.value;
            }
        }
        Ok(dense)
    }

    /// Distribute a square dense matrix that is identical on every process.
    pub fn from_dense(grid: &ProcessGrid, dense: MatRef<'_, T>) -> Result<Self, SpError> {
        if dense.nrows() != dense.ncols() {
            return Err(SpError::DimensionMismatch(format!(
                "dense matrix is {}x{}",
                dense.nrows(),
                dense.ncols()
            )));
        }
        let mut out = Self::new(grid, dense.nrows());
        let (sr, sc) = (out.start_row(), out.start_column());
        let rows = out.end_row().min(out.actual);
        let cols = out.end_column().min(out.actual);
        let mut entries = Vec::new();
        for i in sr..rows {
            for j in sc..cols {
                let v = dense[(i, j)];
                if v != T::zero() {
                    entries.push((i - sr, j - sc, v));
                }
            }
        }
        out.local = CsrMatrix::from_entries(out.block_rows(), out.block_columns(), entries)?;
        Ok(out)
    }

    /// `self · other` with the sparse kernel and no flushing.
    pub fn multiply(&self, other: &Self, pool: &mut MemoryPool<T>) -> Result<Self, SpError> {
        let mut out = self.zeros_like();
        gemm(self, other, &mut out, T::one(), T::zero(), 0.0, pool)?;
        Ok(out)
    }
}
