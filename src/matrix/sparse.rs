//! Local compressed-sparse-row block.
//!
//! Each process stores its share of a distributed matrix as one
//! `CsrMatrix`, a thin wrapper over faer's `SparseRowMat` in local
//! coordinates. Columns are sorted within each row and every stored
//! coordinate is unique.

use std::ops::Range;

use faer::sparse::ops::binary_op;
use faer::sparse::{SparseRowMat, SymbolicSparseRowMat, Triplet};
use faer::{Mat, MatRef};

use crate::core::traits::Scalar;
use crate::core::wire::{WireReader, WireWriter};
use crate::error::SpError;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Rows at or above this count are multiplied in parallel chunks.
#[cfg(feature = "rayon")]
const PARALLEL_ROWS: usize = 256;

#[derive(Clone, Debug)]
pub struct CsrMatrix<T> {
    inner: SparseRowMat<usize, T>,
}

/// Sparse accumulator used by one worker of the row-by-row product.
#[derive(Debug)]
pub struct SpaWorkspace<T> {
    values: Vec<T>,
    stamp: Vec<usize>,
    generation: usize,
    touched: Vec<usize>,
}

impl<T: Scalar> SpaWorkspace<T> {
    pub fn new(width: usize) -> Self {
        Self {
            values: vec![T::zero(); width],
            stamp: vec![0; width],
            generation: 0,
            touched: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }
}

struct RowsPart<T> {
    lengths: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

fn kept<T: Scalar>(v: T, threshold: f64) -> bool {
    v != T::zero() && v.modulus() >= threshold
}

impl<T: Scalar> PartialEq for CsrMatrix<T> {
    fn eq(&self, other: &Self) -> bool {
        self.nrows() == other.nrows()
            && self.ncols() == other.ncols()
            && self.nnz() == other.nnz()
            && self.iter().eq(other.iter())
    }
}

impl<T: Scalar> CsrMatrix<T> {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::from_csr(nrows, ncols, vec![0; nrows + 1], Vec::new(), Vec::new())
    }

    /// Build from raw row pointers, column indices and values. Columns must
    /// be sorted and unique within each row.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Self {
        let symbolic = SymbolicSparseRowMat::new_checked(nrows, ncols, row_ptr, None, col_idx);
        Self { inner: SparseRowMat::new(symbolic, values) }
    }

    /// Build from local `(row, column, value)` entries in any order;
    /// duplicates are summed and exact zeros dropped.
    pub fn from_entries(
        nrows: usize,
        ncols: usize,
        entries: Vec<(usize, usize, T)>,
    ) -> Result<Self, SpError> {
        let triplets: Vec<Triplet<usize, usize, T>> =
            entries.into_iter().map(|(r, c, v)| Triplet::new(r, c, v)).collect();
        let inner = SparseRowMat::<usize, T>::try_new_from_triplets(nrows, ncols, &triplets)?;
        Ok(Self { inner }.filtered(0.0))
    }

    /// Diagonal block: `value(i)` at `(i, i + offset)` for every `i` in
    /// `rows`, given in local row coordinates.
    pub fn diagonal<F: Fn(usize) -> T>(
        nrows: usize,
        ncols: usize,
        rows: Range<usize>,
        offset: isize,
        value: F,
    ) -> Self {
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len());
        row_ptr.push(0);
        for i in 0..nrows {
            if rows.contains(&i) {
                let v = value(i);
                let j = i as isize + offset;
                if v != T::zero() && j >= 0 && (j as usize) < ncols {
                    col_idx.push(j as usize);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Self::from_csr(nrows, ncols, row_ptr, col_idx, values)
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.inner.symbolic().compute_nnz()
    }

    pub fn row(&self, i: usize) -> (&[usize], &[T]) {
        (self.inner.symbolic().col_idx_of_row_raw(i), self.inner.val_of_row(i))
    }

    /// Stored entries in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.nrows()).flat_map(move |i| {
            let (cols, vals) = self.row(i);
            cols.iter().zip(vals).map(move |(&j, &v)| (i, j, v))
        })
    }

    pub fn get(&self, i: usize, j: usize) -> T {
        let (cols, vals) = self.row(i);
        match cols.binary_search(&j) {
            Ok(k) => vals[k],
            Err(_) => T::zero(),
        }
    }

    pub fn transpose(&self) -> Result<Self, SpError> {
        Ok(Self { inner: self.inner.transpose().to_row_major()? })
    }

    pub fn conjugate_in_place(&mut self) {
        if T::IS_COMPLEX {
            self.inner.val_mut().iter_mut().for_each(|v| *v = v.conjugate());
        }
    }

    pub fn scale(&mut self, alpha: T) {
        self.inner.val_mut().iter_mut().for_each(|v| *v *= alpha);
    }

    /// `alpha·a + beta·b`, dropping entries with magnitude below `threshold`.
    pub fn axpby(alpha: T, a: &Self, beta: T, b: &Self, threshold: f64) -> Result<Self, SpError> {
        if (a.nrows(), a.ncols()) != (b.nrows(), b.ncols()) {
            return Err(SpError::DimensionMismatch(format!(
                "local sum {}x{} and {}x{}",
                a.nrows(),
                a.ncols(),
                b.nrows(),
                b.ncols()
            )));
        }
        // faer merges column-major operands; the transposed views are the
        // CSC form of the same rows.
        let sum = binary_op(a.inner.transpose(), b.inner.transpose(), |x: Option<&T>, y: Option<&T>| {
            let x = x.map_or(T::zero(), |&x| alpha * x);
            let y = y.map_or(T::zero(), |&y| beta * y);
            x + y
        })?;
        Ok(Self { inner: sum.into_transpose() }.filtered(threshold))
    }

    /// Drop entries with magnitude below `threshold`.
    pub fn prune(&mut self, threshold: f64) {
        if threshold > 0.0 {
            *self = self.filtered(threshold);
        }
    }

    /// Copy without explicit zeros and entries below `threshold`.
    fn filtered(&self, threshold: f64) -> Self {
        let mut row_ptr = Vec::with_capacity(self.nrows() + 1);
        row_ptr.push(0);
        let mut col_idx = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        for i in 0..self.nrows() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                if kept(v, threshold) {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Self::from_csr(self.nrows(), self.ncols(), row_ptr, col_idx, values)
    }

    /// Sub-block `rows × cols` re-based to the origin.
    pub fn select(&self, rows: Range<usize>, cols: Range<usize>) -> Self {
        let nrows = rows.len();
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        row_ptr.push(0);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        for i in rows {
            let (rc, rv) = self.row(i);
            let lo = rc.partition_point(|&c| c < cols.start);
            let hi = rc.partition_point(|&c| c < cols.end);
            col_idx.extend(rc[lo..hi].iter().map(|&c| c - cols.start));
            values.extend_from_slice(&rv[lo..hi]);
            row_ptr.push(col_idx.len());
        }
        Self::from_csr(nrows, cols.len(), row_ptr, col_idx, values)
    }

    /// Join blocks side by side; each part is `(column offset, block)` with
    /// offsets ascending and ranges disjoint.
    pub fn hstack(nrows: usize, ncols: usize, parts: &[(usize, CsrMatrix<T>)]) -> Self {
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        row_ptr.push(0);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        for i in 0..nrows {
            for (offset, part) in parts {
                let (pc, pv) = part.row(i);
                col_idx.extend(pc.iter().map(|&c| c + offset));
                values.extend_from_slice(pv);
            }
            row_ptr.push(col_idx.len());
        }
        Self::from_csr(nrows, ncols, row_ptr, col_idx, values)
    }

    /// Stack blocks vertically; each part is `(row offset, block)`.
    pub fn vstack(
        nrows: usize,
        ncols: usize,
        parts: &[(usize, CsrMatrix<T>)],
    ) -> Result<Self, SpError> {
        let mut entries = Vec::new();
        for (offset, part) in parts {
            entries.extend(part.iter().map(|(i, j, v)| (i + offset, j, v)));
        }
        Self::from_entries(nrows, ncols, entries)
    }

    /// Row-by-row (Gustavson) product `self · other`, flushing entries below
    /// `threshold`. Rows are split across the given workspaces.
    pub fn multiply(
        &self,
        other: &Self,
        threshold: f64,
        workspaces: &mut [SpaWorkspace<T>],
    ) -> Result<Self, SpError> {
        let nrows = self.nrows();
        if self.ncols() != other.nrows() {
            return Err(SpError::DimensionMismatch(format!(
                "local product {}x{} by {}x{}",
                nrows,
                self.ncols(),
                other.nrows(),
                other.ncols()
            )));
        }
        if workspaces.is_empty() || workspaces.iter().any(|w| w.width() < other.ncols()) {
            return Err(SpError::InvalidArgument(
                "multiply workspace narrower than the right operand".to_string(),
            ));
        }

        #[cfg(feature = "rayon")]
        let parts: Vec<RowsPart<T>> = if nrows >= PARALLEL_ROWS && workspaces.len() > 1 {
            let chunk = nrows.div_ceil(workspaces.len());
            workspaces
                .par_iter_mut()
                .enumerate()
                .map(|(k, ws)| {
                    let start = (k * chunk).min(nrows);
                    let end = ((k + 1) * chunk).min(nrows);
                    self.multiply_rows(other, start..end, threshold, ws)
                })
                .collect()
        } else {
            vec![self.multiply_rows(other, 0..nrows, threshold, &mut workspaces[0])]
        };
        #[cfg(not(feature = "rayon"))]
        let parts = vec![self.multiply_rows(other, 0..nrows, threshold, &mut workspaces[0])];

        let mut row_ptr = Vec::with_capacity(nrows + 1);
        row_ptr.push(0);
        let total: usize = parts.iter().map(|p| p.values.len()).sum();
        let mut col_idx = Vec::with_capacity(total);
        let mut values = Vec::with_capacity(total);
        for part in parts {
            for len in part.lengths {
                let last = row_ptr.last().copied().unwrap_or(0);
                row_ptr.push(last + len);
            }
            col_idx.extend(part.col_idx);
            values.extend(part.values);
        }
        Ok(Self::from_csr(nrows, other.ncols(), row_ptr, col_idx, values))
    }

    fn multiply_rows(
        &self,
        other: &Self,
        rows: Range<usize>,
        threshold: f64,
        ws: &mut SpaWorkspace<T>,
    ) -> RowsPart<T> {
        let mut part = RowsPart {
            lengths: Vec::with_capacity(rows.len()),
            col_idx: Vec::new(),
            values: Vec::new(),
        };
        for i in rows {
            ws.generation += 1;
            let stamp = ws.generation;
            ws.touched.clear();
            let (ac, av) = self.row(i);
            for (&k, &a) in ac.iter().zip(av) {
                let (bc, bv) = other.row(k);
                for (&j, &b) in bc.iter().zip(bv) {
                    if ws.stamp[j] == stamp {
                        ws.values[j] += a * b;
                    } else {
                        ws.stamp[j] = stamp;
                        ws.values[j] = a * b;
                        ws.touched.push(j);
                    }
                }
            }
            ws.touched.sort_unstable();
            let before = part.values.len();
            for &j in &ws.touched {
                let v = ws.values[j];
                if kept(v, threshold) {
                    part.col_idx.push(j);
                    part.values.push(v);
                }
            }
            part.lengths.push(part.values.len() - before);
        }
        part
    }

    pub fn frobenius_sqr(&self) -> f64 {
        self.iter().map(|(_, _, v)| v.modulus_sqr()).sum()
    }

    pub fn max_abs(&self) -> f64 {
        self.iter().map(|(_, _, v)| v.modulus()).fold(0.0, f64::max)
    }

    pub fn to_dense(&self) -> Mat<T> {
        self.inner.to_dense()
    }

    pub fn from_dense(dense: MatRef<'_, T>, threshold: f64) -> Self {
        let mut row_ptr = Vec::with_capacity(dense.nrows() + 1);
        row_ptr.push(0);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        for i in 0..dense.nrows() {
            for j in 0..dense.ncols() {
                let v = dense[(i, j)];
                if kept(v, threshold) {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Self::from_csr(dense.nrows(), dense.ncols(), row_ptr, col_idx, values)
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.put_usize(self.nrows());
        w.put_usize(self.ncols());
        let lengths: Vec<usize> = (0..self.nrows()).map(|i| self.row(i).0.len()).collect();
        w.put_usizes(&lengths);
        let (cols, vals): (Vec<usize>, Vec<T>) = self.iter().map(|(_, j, v)| (j, v)).unzip();
        w.put_usizes(&cols);
        w.put_scalars(&vals);
    }

    pub(crate) fn decode(r: &mut WireReader<'_>) -> Result<Self, SpError> {
        let nrows = r.get_usize()?;
        let ncols = r.get_usize()?;
        let lengths = r.get_usizes()?;
        let col_idx = r.get_usizes()?;
        let values = r.get_scalars()?;
        if lengths.len() != nrows || col_idx.len() != values.len() {
            return Err(SpError::Io("inconsistent CSR block in message".to_string()));
        }
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        row_ptr.push(0);
        for len in lengths {
            let start = row_ptr[row_ptr.len() - 1];
            let end = start + len;
            let sorted = end <= col_idx.len()
                && col_idx[start..end].windows(2).all(|w| w[0] < w[1])
                && col_idx[start..end].iter().all(|&c| c < ncols);
            if !sorted {
                return Err(SpError::Io("inconsistent CSR block in message".to_string()));
            }
            row_ptr.push(end);
        }
        if row_ptr[nrows] != col_idx.len() {
            return Err(SpError::Io("inconsistent CSR block in message".to_string()));
        }
        Ok(Self::from_csr(nrows, ncols, row_ptr, col_idx, values))
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(32 + self.nnz() * (8 + 8 * T::WORDS));
        self.encode(&mut w);
        w.into_bytes()
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, SpError> {
        Self::decode(&mut WireReader::new(bytes))
    }
}
