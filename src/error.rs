use crate::lamellae::{Backend, Msg};

/// A shape or id precondition that failed before any communication took place
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionError {
    /// The global matrix dimension was zero
    ZeroSize,
    /// The worker count was zero
    ZeroWorkers,
    /// A worker id outside of `0..num_workers`
    WorkerOutOfRange { worker: usize, num_workers: usize },
    /// The inner dimensions of a product disagree: `(m x k) * (k' x p)` with `k != k'`
    InnerMismatch {
        lhs: (usize, usize),
        rhs: (usize, usize),
    },
    /// A matrix did not have the shape the operation requires
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// The backing buffer length does not equal `rows * cols`
    DataLength { expected: usize, found: usize },
    /// Column blocks handed to a concatenation have different row counts
    RaggedBlocks { expected_rows: usize, found_rows: usize },
    /// Benchmark-shaped gather trials need `n % num_workers == 0`
    UnevenSplit { n: usize, num_workers: usize },
    /// A row index outside of `0..n`
    RowOutOfRange { row: usize, n: usize },
    /// A worker-to-slot order that is not a permutation of `0..num_workers`
    InvalidSlotOrder(Vec<usize>),
}

impl std::fmt::Display for DimensionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DimensionError::ZeroSize => write!(f, "matrix dimension must be at least 1"),
            DimensionError::ZeroWorkers => write!(f, "worker count must be at least 1"),
            DimensionError::WorkerOutOfRange {
                worker,
                num_workers,
            } => {
                write!(f, "worker {} is not in 0..{}", worker, num_workers)
            }
            DimensionError::InnerMismatch { lhs, rhs } => {
                write!(
                    f,
                    "cannot multiply {}x{} by {}x{}",
                    lhs.0, lhs.1, rhs.0, rhs.1
                )
            }
            DimensionError::ShapeMismatch { expected, found } => {
                write!(
                    f,
                    "expected a {}x{} matrix, found {}x{}",
                    expected.0, expected.1, found.0, found.1
                )
            }
            DimensionError::DataLength { expected, found } => {
                write!(
                    f,
                    "matrix buffer holds {} elements, shape requires {}",
                    found, expected
                )
            }
            DimensionError::RaggedBlocks {
                expected_rows,
                found_rows,
            } => {
                write!(
                    f,
                    "cannot concatenate a block with {} rows onto blocks with {} rows",
                    found_rows, expected_rows
                )
            }
            DimensionError::UnevenSplit { n, num_workers } => {
                write!(
                    f,
                    "matrix dimension {} is not divisible by {} workers",
                    n, num_workers
                )
            }
            DimensionError::RowOutOfRange { row, n } => {
                write!(f, "row {} is not in 0..{}", row, n)
            }
            DimensionError::InvalidSlotOrder(order) => {
                write!(f, "{:?} is not a permutation of the worker ids", order)
            }
        }
    }
}

impl std::error::Error for DimensionError {}

/// Failures surfaced by a lamellae backend
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The peer dropped its endpoint (it returned or panicked) while we were waiting on it
    Disconnected { pe: usize },
    /// A send or receive named a worker that is not part of the world
    InvalidPe { pe: usize, num_pes: usize },
    /// A message arrived but it belongs to a different operation than the one we are in
    UnexpectedMessage { expected: Msg, found: Msg },
    /// bincode failed to encode or decode a payload
    Serialization(String),
    /// A worker thread panicked
    WorkerPanicked { pe: usize },
    /// The backend cannot host the requested number of workers
    UnsupportedWorkerCount { backend: Backend, num_workers: usize },
    /// The OS refused to spawn a worker thread
    Spawn(String),
    /// The root of a broadcast had nothing to broadcast
    MissingRootValue { root: usize },
    /// Contributions to an all-reduce did not share a shape
    ReduceShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TransportError::Disconnected { pe } => {
                write!(f, "pe {} disconnected", pe)
            }
            TransportError::InvalidPe { pe, num_pes } => {
                write!(f, "invalid pe {} for a world of {} pes", pe, num_pes)
            }
            TransportError::UnexpectedMessage { expected, found } => {
                write!(f, "expected a {:?} message, received {:?}", expected, found)
            }
            TransportError::Serialization(msg) => {
                write!(f, "serialization error: {}", msg)
            }
            TransportError::WorkerPanicked { pe } => {
                write!(f, "worker {} panicked", pe)
            }
            TransportError::UnsupportedWorkerCount {
                backend,
                num_workers,
            } => {
                write!(
                    f,
                    "the {:?} backend cannot run {} workers",
                    backend, num_workers
                )
            }
            TransportError::Spawn(msg) => {
                write!(f, "unable to spawn worker thread: {}", msg)
            }
            TransportError::MissingRootValue { root } => {
                write!(f, "broadcast root {} supplied no value", root)
            }
            TransportError::ReduceShapeMismatch { expected, found } => {
                write!(
                    f,
                    "all-reduce contributions disagree: {}x{} vs {}x{}",
                    expected.0, expected.1, found.0, found.1
                )
            }
        }
    }
}

impl std::error::Error for TransportError {}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// The error type returned by every partitioned multiply operation
#[derive(Debug, Clone, PartialEq)]
pub enum GemmError {
    /// Bad `n`, worker count, worker id, or operand shapes
    InvalidDimension(DimensionError),
    /// Opaque transport failure, surfaced unchanged and never retried
    TransportFailure(TransportError),
    /// An unrecognized or inapplicable recombination strategy
    StrategyMisconfiguration(String),
    /// A distributed product disagreed with the sequential product
    VerificationFailed { max_relative_error: f64 },
}

impl std::fmt::Display for GemmError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            GemmError::InvalidDimension(err) => write!(f, "invalid dimension: {}", err),
            GemmError::TransportFailure(err) => write!(f, "transport failure: {}", err),
            GemmError::StrategyMisconfiguration(msg) => {
                write!(f, "strategy misconfiguration: {}", msg)
            }
            GemmError::VerificationFailed { max_relative_error } => {
                write!(
                    f,
                    "distributed product differs from sequential product (max relative error {:e})",
                    max_relative_error
                )
            }
        }
    }
}

impl std::error::Error for GemmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GemmError::InvalidDimension(err) => Some(err),
            GemmError::TransportFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DimensionError> for GemmError {
    fn from(err: DimensionError) -> Self {
        GemmError::InvalidDimension(err)
    }
}

impl From<TransportError> for GemmError {
    fn from(err: TransportError) -> Self {
        GemmError::TransportFailure(err)
    }
}

pub type GemmResult<T> = Result<T, GemmError>;
