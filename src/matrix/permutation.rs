//! Relabeling of global indices for load balance.
//!
//! A permutation maps index `i` to `lookup[i]`. Applied to a matrix it moves
//! entry `(i, j)` to `(lookup[i], lookup[j])`, which spreads clustered
//! nonzeros over the grid. A permutation covers either the actual or the
//! logical dimension; in the latter case it is applied through the order of
//! the labels it gives the actual indices, so padding stays empty.

use std::borrow::Cow;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::context::ProcessGrid;
use crate::core::traits::Scalar;
use crate::error::SpError;
use crate::matrix::distributed::DistributedSparseMatrix;
use crate::matrix::triplet::{Triplet, TripletList};
use crate::parallel::Comm;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    lookup: Vec<usize>,
}

impl Permutation {
    pub fn identity(length: usize) -> Self {
        Self { lookup: (0..length).collect() }
    }

    /// `i ↦ length - 1 - i`.
    pub fn reverse(length: usize) -> Self {
        Self { lookup: (0..length).rev().collect() }
    }

    /// Random shuffle of `0..length`, identical on every process of `grid`.
    /// The seed is drawn on the root and broadcast.
    pub fn random(grid: &ProcessGrid, length: usize) -> Self {
        let seed = grid.world().broadcast_u64(rand::random::<u64>(), 0);
        Self::seeded(length, seed)
    }

    /// Random shuffle from a caller-chosen seed.
    pub fn seeded(length: usize, seed: u64) -> Self {
        let mut lookup: Vec<usize> = (0..length).collect();
        lookup.shuffle(&mut StdRng::seed_from_u64(seed));
        Self { lookup }
    }

    /// Build from an explicit lookup table, which must be a bijection.
    pub fn from_lookup(lookup: Vec<usize>) -> Result<Self, SpError> {
        let mut seen = vec![false; lookup.len()];
        for &target in &lookup {
            match seen.get_mut(target) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(SpError::InvalidArgument(format!(
                        "lookup entry {target} is repeated or out of range"
                    )));
                }
            }
        }
        Ok(Self { lookup })
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// `lookup[i]` is the new label of index `i`.
    pub fn index_lookup(&self) -> &[usize] {
        &self.lookup
    }

    /// Inverse table: `reverse_lookup()[lookup[i]] == i`.
    pub fn reverse_lookup(&self) -> Vec<usize> {
        let mut inverse = vec![0; self.lookup.len()];
        for (i, &target) in self.lookup.iter().enumerate() {
            inverse[target] = i;
        }
        inverse
    }

    pub fn inverse(&self) -> Self {
        Self { lookup: self.reverse_lookup() }
    }

    /// The lookup restricted to `matrix`'s actual indices. A permutation of
    /// the logical dimension keeps the relative order of the labels it gives
    /// the actual indices, so padding never receives an entry.
    fn fitted<T: Scalar>(
        &self,
        matrix: &DistributedSparseMatrix<T>,
    ) -> Result<Cow<'_, [usize]>, SpError> {
        let (actual, logical) = (matrix.actual_dimension(), matrix.logical_dimension());
        if self.lookup.len() == actual {
            return Ok(Cow::Borrowed(&self.lookup));
        }
        if self.lookup.len() != logical {
            return Err(SpError::InvalidArgument(format!(
                "permutation of length {} does not fit a matrix of dimension {} (logical {})",
                self.lookup.len(),
                actual,
                logical
            )));
        }
        let mut rank = vec![None; logical];
        for &target in &self.lookup[..actual] {
            rank[target] = Some(0);
        }
        let mut next = 0;
        for slot in rank.iter_mut().flatten() {
            *slot = next;
            next += 1;
        }
        Ok(Cow::Owned(
            self.lookup[..actual].iter().filter_map(|&target| rank[target]).collect(),
        ))
    }

    fn relabel<T: Scalar>(
        matrix: &DistributedSparseMatrix<T>,
        lookup: &[usize],
    ) -> Result<DistributedSparseMatrix<T>, SpError> {
        let moved: TripletList<T> = matrix
            .local_triplets()
            .into_iter()
            .map(|t| Triplet::new(lookup[t.row], lookup[t.column], t.value))
            .collect();
        let mut out = matrix.zeros_like();
        out.fill_from_triplet_list_preduplicated(&moved)?;
        Ok(out)
    }

    /// New matrix with entry `(i, j)` moved to `(lookup[i], lookup[j])`.
    pub fn apply<T: Scalar>(
        &self,
        matrix: &DistributedSparseMatrix<T>,
    ) -> Result<DistributedSparseMatrix<T>, SpError> {
        let lookup = self.fitted(matrix)?;
        Self::relabel(matrix, &lookup)
    }

    /// Inverse of [`apply`](Self::apply).
    pub fn undo<T: Scalar>(
        &self,
        matrix: &DistributedSparseMatrix<T>,
    ) -> Result<DistributedSparseMatrix<T>, SpError> {
        let lookup = self.fitted(matrix)?;
        let mut inverse = vec![0; lookup.len()];
        for (i, &target) in lookup.iter().enumerate() {
            inverse[target] = i;
        }
        Self::relabel(matrix, &inverse)
    }
}
