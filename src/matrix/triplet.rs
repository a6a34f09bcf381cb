//! (row, column, value) exchange format.

use crate::core::traits::Scalar;
use crate::core::wire::{WireReader, WireWriter};
use crate::error::SpError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triplet<T> {
    pub row: usize,
    pub column: usize,
    pub value: T,
}

impl<T> Triplet<T> {
    pub fn new(row: usize, column: usize, value: T) -> Self {
        Self { row, column, value }
    }
}

/// Appendable list of global triplets. Duplicated coordinates are allowed
/// and are summed when the list is filled into a matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct TripletList<T> {
    data: Vec<Triplet<T>>,
}

impl<T> Default for TripletList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

impl<T: Scalar> TripletList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity) }
    }

    pub fn append(&mut self, triplet: Triplet<T>) {
        self.data.push(triplet);
    }

    pub fn push(&mut self, row: usize, column: usize, value: T) {
        self.data.push(Triplet::new(row, column, value));
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Triplet<T>> {
        self.data.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Triplet<T>> {
        self.data.iter()
    }

    pub fn as_slice(&self) -> &[Triplet<T>] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<Triplet<T>> {
        self.data
    }

    /// Row-major order, columns ascending within a row. Stable, so
    /// duplicates keep their relative order.
    pub fn sort(&mut self) {
        self.data.sort_by_key(|t| (t.row, t.column));
    }

    /// Sort and merge duplicated coordinates.
    pub fn sort_and_sum(&mut self) {
        self.sort();
        let mut merged: Vec<Triplet<T>> = Vec::with_capacity(self.data.len());
        for t in self.data.drain(..) {
            match merged.last_mut() {
                Some(last) if last.row == t.row && last.column == t.column => last.value += t.value,
                _ => merged.push(t),
            }
        }
        self.data = merged;
    }

    /// Largest row or column index plus one; zero when empty.
    pub fn extent(&self) -> usize {
        self.data
            .iter()
            .map(|t| t.row.max(t.column) + 1)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.put_usize(self.data.len());
        for t in &self.data {
            w.put_usize(t.row);
            w.put_usize(t.column);
            w.put_scalar(t.value);
        }
    }

    pub(crate) fn decode(r: &mut WireReader<'_>) -> Result<Self, SpError> {
        let n = r.get_usize()?;
        let mut list = Self::with_capacity(n);
        for _ in 0..n {
            let row = r.get_usize()?;
            let column = r.get_usize()?;
            let value = r.get_scalar()?;
            list.push(row, column, value);
        }
        Ok(list)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(8 + self.data.len() * (16 + 8 * T::WORDS));
        self.encode(&mut w);
        w.into_bytes()
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, SpError> {
        Self::decode(&mut WireReader::new(bytes))
    }
}

impl<T> Extend<Triplet<T>> for TripletList<T> {
    fn extend<I: IntoIterator<Item = Triplet<T>>>(&mut self, iter: I) {
        self.data.extend(iter);
    }
}

impl<T> FromIterator<Triplet<T>> for TripletList<T> {
    fn from_iter<I: IntoIterator<Item = Triplet<T>>>(iter: I) -> Self {
        Self { data: iter.into_iter().collect() }
    }
}

impl<T> IntoIterator for TripletList<T> {
    type Item = Triplet<T>;
    type IntoIter = std::vec::IntoIter<Triplet<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a TripletList<T> {
    type Item = &'a Triplet<T>;
    type IntoIter = std::slice::Iter<'a, Triplet<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_is_row_major() {
        let mut list = TripletList::new();
        list.push(2, 0, 1.0);
        list.push(0, 3, 2.0);
        list.push(0, 1, 3.0);
        list.sort();
        let coords: Vec<_> = list.iter().map(|t| (t.row, t.column)).collect();
        assert_eq!(coords, vec![(0, 1), (0, 3), (2, 0)]);
        assert_eq!(list.extent(), 4);
    }

    #[test]
    fn duplicates_are_summed() {
        let mut list: TripletList<f64> =
            [Triplet::new(1, 1, 1.5), Triplet::new(0, 0, 1.0), Triplet::new(1, 1, 2.5)]
                .into_iter()
                .collect();
        list.sort_and_sum();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(1), Some(&Triplet::new(1, 1, 4.0)));
    }

    #[test]
    fn byte_encoding() {
        let mut list = TripletList::new();
        list.push(5, 7, num_complex::Complex64::new(1.0, 2.0));
        let back = TripletList::from_bytes(&list.to_bytes()).unwrap();
        assert_eq!(back, list);
    }
}
