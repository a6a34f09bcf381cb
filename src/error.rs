use thiserror::Error;

// Unified error type for sparsefn

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpError {
    #[error("invalid process grid {rows}x{columns}x{slices} for {processes} processes")]
    InvalidTopology {
        rows: usize,
        columns: usize,
        slices: usize,
        processes: usize,
    },
    #[error("no process grid is active on this process")]
    NoActiveGrid,
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("malformed matrix file: {0}")]
    MalformedFile(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("did not converge after {iterations} iterations (residual {residual:e})")]
    DidNotConverge { iterations: usize, residual: f64 },
    #[error("matrix is not positive definite (pivot {0})")]
    NotPositiveDefinite(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("sparse storage: {0}")]
    Storage(String),
}

impl From<faer::sparse::FaerError> for SpError {
    fn from(err: faer::sparse::FaerError) -> Self {
        SpError::Storage(err.to_string())
    }
}

impl From<faer::sparse::CreationError> for SpError {
    fn from(err: faer::sparse::CreationError) -> Self {
        SpError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for SpError {
    fn from(err: std::io::Error) -> Self {
        SpError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_message() {
        let err = SpError::InvalidTopology { rows: 2, columns: 2, slices: 1, processes: 3 };
        assert_eq!(err.to_string(), "invalid process grid 2x2x1 for 3 processes");
    }

    #[test]
    fn io_errors_are_stringified() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.mtx");
        let err: SpError = io.into();
        assert_eq!(err, SpError::Io("missing.mtx".to_string()));
    }
}
