//! Matrix Market and binary file I/O.
//!
//! Reading and writing are collective. The root process alone touches the
//! file; the outcome is broadcast so every process returns the same result.
//!
//! Binary layout (little endian):
//!
//! | bytes | content |
//! |---|---|
//! | 4 | magic `SPFN` |
//! | 1 | version (1) |
//! | 1 | 1 for complex values, else 0 |
//! | 2 | reserved |
//! | 8 × 3 | rows, columns, nnz |
//! | per entry | `u64` row, `u64` column (0-indexed), `f64` real, `f64` imaginary if complex |

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::context::ProcessGrid;
use crate::core::traits::Scalar;
use crate::core::wire::{WireReader, WireWriter};
use crate::error::SpError;
use crate::matrix::distributed::DistributedSparseMatrix;
use crate::matrix::triplet::TripletList;
use crate::parallel::Comm;

const MAGIC: &[u8; 4] = b"SPFN";
const VERSION: u8 = 1;
/// Upper bound on the entries reserved from a header's declared count.
const MAX_RESERVED_ENTRIES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symmetry {
    General,
    Symmetric,
    SkewSymmetric,
    Hermitian,
}

fn malformed(message: impl Into<String>) -> SpError {
    SpError::MalformedFile(message.into())
}

fn parse_field<V: std::str::FromStr>(token: Option<&str>, line: usize) -> Result<V, SpError> {
    let token = token.ok_or_else(|| malformed(format!("line {line}: missing field")))?;
    token
        .parse::<V>()
        .map_err(|_| malformed(format!("line {line}: cannot parse {token:?}")))
}

/// Check a declared entry count against the shape and return how many
/// entries to reserve.
fn reserved_entries(rows: usize, columns: usize, nnz: usize) -> Result<usize, SpError> {
    if rows.checked_mul(columns).is_some_and(|cells| nnz > cells) {
        return Err(malformed(format!("{nnz} entries declared for a {rows}x{columns} matrix")));
    }
    Ok(nnz.min(MAX_RESERVED_ENTRIES))
}

/// Parse a coordinate Matrix Market file into `(dimension, triplets)`.
fn parse_matrix_market<T: Scalar>(path: &Path) -> Result<(usize, TripletList<T>), SpError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines().enumerate();

    let (_, header) = lines.next().ok_or_else(|| malformed("empty file"))?;
    let header = header?.to_lowercase();
    let tokens: Vec<&str> = header.split_whitespace().collect();
    if tokens.len() != 5 || tokens[0] != "%%matrixmarket" || tokens[1] != "matrix" {
        return Err(malformed("missing %%MatrixMarket matrix header"));
    }
    if tokens[2] != "coordinate" {
        return Err(malformed(format!("unsupported format {:?}", tokens[2])));
    }
    let complex = match tokens[3] {
        "real" | "integer" => false,
        "complex" => true,
        other => return Err(malformed(format!("unsupported field {other:?}"))),
    };
    if complex && !T::IS_COMPLEX {
        return Err(malformed("complex values cannot be read into a real matrix"));
    }
    let symmetry = match tokens[4] {
        "general" => Symmetry::General,
        "symmetric" => Symmetry::Symmetric,
        "skew-symmetric" => Symmetry::SkewSymmetric,
        "hermitian" => Symmetry::Hermitian,
        other => return Err(malformed(format!("unsupported symmetry {other:?}"))),
    };

    let mut size: Option<(usize, usize, usize)> = None;
    let mut list = TripletList::new();
    let mut read = 0usize;
    for (index, line) in lines {
        let line = line?;
        let number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let Some((rows, columns, _)) = size else {
            let rows = parse_field(fields.next(), number)?;
            let columns = parse_field(fields.next(), number)?;
            let nnz = parse_field(fields.next(), number)?;
            list = TripletList::with_capacity(reserved_entries(rows, columns, nnz)?);
            size = Some((rows, columns, nnz));
            continue;
        };
        let row: usize = parse_field(fields.next(), number)?;
        let column: usize = parse_field(fields.next(), number)?;
        if row == 0 || column == 0 || row > rows || column > columns {
            return Err(malformed(format!("line {number}: index ({row}, {column}) out of range")));
        }
        let re: f64 = parse_field(fields.next(), number)?;
        let im: f64 = if complex { parse_field(fields.next(), number)? } else { 0.0 };
        let value = T::from_parts(re, im);
        read += 1;
        let (i, j) = (row - 1, column - 1);
        list.push(i, j, value);
        if i != j {
            match symmetry {
                Symmetry::General => {}
                Symmetry::Symmetric => list.push(j, i, value),
                Symmetry::SkewSymmetric => list.push(j, i, -value),
                Symmetry::Hermitian => list.push(j, i, value.conjugate()),
            }
        }
    }

    let (rows, columns, nnz) = size.ok_or_else(|| malformed("missing size line"))?;
    if read != nnz {
        return Err(malformed(format!("expected {nnz} entries, found {read}")));
    }
    Ok((rows.max(columns), list))
}

fn read_u64(reader: &mut impl Read) -> Result<u64, SpError> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|_| malformed("truncated binary file"))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_index(reader: &mut impl Read) -> Result<usize, SpError> {
    let value = read_u64(reader)?;
    usize::try_from(value).map_err(|_| malformed(format!("index {value} does not fit in memory")))
}

fn read_f64(reader: &mut impl Read) -> Result<f64, SpError> {
    Ok(f64::from_bits(read_u64(reader)?))
}

fn parse_binary<T: Scalar>(path: &Path) -> Result<(usize, TripletList<T>), SpError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut header = [0u8; 8];
    reader
        .read_exact(&mut header)
        .map_err(|_| malformed("truncated binary header"))?;
    if &header[..4] != MAGIC {
        return Err(malformed("bad magic number"));
    }
    if header[4] != VERSION {
        return Err(malformed(format!("unsupported version {}", header[4])));
    }
    let complex = header[5] == 1;
    if complex && !T::IS_COMPLEX {
        return Err(malformed("complex values cannot be read into a real matrix"));
    }
    let rows = read_index(&mut reader)?;
    let columns = read_index(&mut reader)?;
    let nnz = read_index(&mut reader)?;
    let mut list = TripletList::with_capacity(reserved_entries(rows, columns, nnz)?);
    for _ in 0..nnz {
        let row = read_index(&mut reader)?;
        let column = read_index(&mut reader)?;
        let re = read_f64(&mut reader)?;
        let im = if complex { read_f64(&mut reader)? } else { 0.0 };
        if row >= rows || column >= columns {
            return Err(malformed(format!("entry ({row}, {column}) out of range")));
        }
        list.push(row, column, T::from_parts(re, im));
    }
    Ok((rows.max(columns), list))
}

/// Broadcast the root's parse outcome and build the matrix from it.
fn distribute_parsed<T: Scalar>(
    grid: &ProcessGrid,
    parsed: Option<Result<(usize, TripletList<T>), SpError>>,
) -> Result<DistributedSparseMatrix<T>, SpError> {
    let mut status = WireWriter::new();
    let mut list = TripletList::new();
    match parsed {
        Some(Ok((dimension, triplets))) => {
            status.put_u8(0);
            status.put_usize(dimension);
            list = triplets;
        }
        Some(Err(err)) => {
            let message = match err {
                SpError::MalformedFile(m) => m,
                other => other.to_string(),
            };
            status.put_u8(1);
            status.put_str(&message);
        }
        None => {}
    }
    let mut bytes = status.into_bytes();
    grid.world().broadcast_bytes(&mut bytes, 0);

    let mut r = WireReader::new(&bytes);
    match r.get_u8()? {
        0 => {
            let dimension = r.get_usize()?;
            let mut matrix = DistributedSparseMatrix::new(grid, dimension);
            matrix.fill_from_triplet_list(&list)?;
            Ok(matrix)
        }
        _ => Err(SpError::MalformedFile(r.get_string()?)),
    }
}

impl<T: Scalar> DistributedSparseMatrix<T> {
    /// Read a coordinate Matrix Market file (`real`, `integer` or `complex`;
    /// `general`, `symmetric`, `skew-symmetric` or `hermitian`).
    pub fn read_matrix_market(grid: &ProcessGrid, path: impl AsRef<Path>) -> Result<Self, SpError> {
        let parsed = grid.is_root().then(|| parse_matrix_market(path.as_ref()));
        distribute_parsed(grid, parsed)
    }

    pub fn read_binary(grid: &ProcessGrid, path: impl AsRef<Path>) -> Result<Self, SpError> {
        let parsed = grid.is_root().then(|| parse_binary(path.as_ref()));
        distribute_parsed(grid, parsed)
    }

    /// All entries on the root in row-major order; empty elsewhere.
    fn gather_on_root(&self) -> Result<TripletList<T>, SpError> {
        let parts = self
            .grid()
            .within_slice_comm()
            .gather_bytes(&self.get_triplet_list().to_bytes(), 0);
        let mut all = TripletList::new();
        if self.grid().is_root() {
            for bytes in &parts {
                all.extend(TripletList::from_bytes(bytes)?);
            }
            all.sort();
        }
        Ok(all)
    }

    /// Share the root's write outcome with every process.
    fn broadcast_outcome(&self, outcome: Result<(), SpError>) -> Result<(), SpError> {
        let mut status = WireWriter::new();
        match &outcome {
            Ok(()) => status.put_u8(0),
            Err(err) => {
                status.put_u8(1);
                status.put_str(&err.to_string());
            }
        }
        let mut bytes = status.into_bytes();
        self.grid().world().broadcast_bytes(&mut bytes, 0);
        let mut r = WireReader::new(&bytes);
        if r.get_u8()? == 0 {
            return Ok(());
        }
        match outcome {
            Err(err) => Err(err),
            Ok(()) => Err(SpError::Io(r.get_string()?)),
        }
    }

    /// Write a `general` coordinate Matrix Market file, 1-indexed and
    /// row-major.
    pub fn write_matrix_market(&self, path: impl AsRef<Path>) -> Result<(), SpError> {
        let all = self.gather_on_root()?;
        let outcome = if self.grid().is_root() {
            self.write_text(path.as_ref(), &all)
        } else {
            Ok(())
        };
        self.broadcast_outcome(outcome)
    }

    fn write_text(&self, path: &Path, all: &TripletList<T>) -> Result<(), SpError> {
        let mut out = BufWriter::new(File::create(path)?);
        let field = if T::IS_COMPLEX { "complex" } else { "real" };
        writeln!(out, "%%MatrixMarket matrix coordinate {field} general")?;
        let n = self.actual_dimension();
        writeln!(out, "{n} {n} {}", all.len())?;
        for t in all {
            if T::IS_COMPLEX {
                writeln!(out, "{} {} {:e} {:e}", t.row + 1, t.column + 1, t.value.real(), t.value.imag())?;
            } else {
                writeln!(out, "{} {} {:e}", t.row + 1, t.column + 1, t.value.real())?;
            }
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_binary(&self, path: impl AsRef<Path>) -> Result<(), SpError> {
        let all = self.gather_on_root()?;
        let outcome = if self.grid().is_root() {
            self.write_records(path.as_ref(), &all)
        } else {
            Ok(())
        };
        self.broadcast_outcome(outcome)
    }

    fn write_records(&self, path: &Path, all: &TripletList<T>) -> Result<(), SpError> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(MAGIC)?;
        out.write_all(&[VERSION, u8::from(T::IS_COMPLEX), 0, 0])?;
        let n = self.actual_dimension() as u64;
        for v in [n, n, all.len() as u64] {
            out.write_all(&v.to_le_bytes())?;
        }
        for t in all {
            out.write_all(&(t.row as u64).to_le_bytes())?;
            out.write_all(&(t.column as u64).to_le_bytes())?;
            out.write_all(&t.value.real().to_le_bytes())?;
            if T::IS_COMPLEX {
                out.write_all(&t.value.imag().to_le_bytes())?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sparsefn-io-{}-{name}", std::process::id()))
    }

    #[test]
    fn symmetric_file_is_expanded() {
        let path = scratch("sym.mtx");
        std::fs::write(
            &path,
            "%%MatrixMarket matrix coordinate real symmetric\n% comment\n3 3 3\n1 1 2.0\n3 1 -1.5\n2 2 1e-3\n",
        )
        .unwrap();
        let grid = ProcessGrid::serial();
        let m = DistributedSparseMatrix::<f64>::read_matrix_market(&grid, &path).unwrap();
        let dense = m.to_dense().unwrap();
        assert_eq!(dense[(0, 2)], -1.5);
        assert_eq!(dense[(2, 0)], -1.5);
        assert_eq!(m.nnz(), 4);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn malformed_header_is_reported() {
        let path = scratch("bad.mtx");
        std::fs::write(&path, "%%MatrixMarket matrix array real general\n2 2\n").unwrap();
        let grid = ProcessGrid::serial();
        let err = DistributedSparseMatrix::<f64>::read_matrix_market(&grid, &path).unwrap_err();
        assert!(matches!(err, SpError::MalformedFile(_)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn oversized_entry_count_is_reported() {
        let path = scratch("huge.mtx");
        std::fs::write(
            &path,
            "%%MatrixMarket matrix coordinate real general\n3 3 1000000000000000000\n1 1 1.0\n",
        )
        .unwrap();
        let grid = ProcessGrid::serial();
        let err = DistributedSparseMatrix::<f64>::read_matrix_market(&grid, &path).unwrap_err();
        assert!(matches!(err, SpError::MalformedFile(_)));
        std::fs::remove_file(path).ok();

        let path = scratch("huge.bin");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[VERSION, 0, 0, 0]);
        for v in [3u64, 3, u64::MAX] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&path, &bytes).unwrap();
        let err = DistributedSparseMatrix::<f64>::read_binary(&grid, &path).unwrap_err();
        assert!(matches!(err, SpError::MalformedFile(_)));

        // a large declared count on a large shape only fails once the data runs out
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[VERSION, 0, 0, 0]);
        for v in [1u64 << 31, 1 << 31, 1 << 40] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&path, &bytes).unwrap();
        let err = DistributedSparseMatrix::<f64>::read_binary(&grid, &path).unwrap_err();
        assert!(matches!(err, SpError::MalformedFile(_)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn complex_binary_keeps_exact_values() {
        let path = scratch("c.bin");
        let grid = ProcessGrid::serial();
        let mut list = TripletList::new();
        list.push(0, 1, Complex64::new(0.1, -1.0 / 3.0));
        list.push(2, 2, Complex64::new(std::f64::consts::PI, 0.0));
        let mut m = DistributedSparseMatrix::new(&grid, 3);
        m.fill_from_triplet_list(&list).unwrap();
        m.write_binary(&path).unwrap();
        let back = DistributedSparseMatrix::<Complex64>::read_binary(&grid, &path).unwrap();
        assert_eq!(back.get_triplet_list(), m.get_triplet_list());
        assert!(DistributedSparseMatrix::<f64>::read_binary(&grid, &path).is_err());
        std::fs::remove_file(path).ok();
    }
}
