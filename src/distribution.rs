//! Block row distribution of an `n x n` matrix over a set of workers.
//!
//! Rows are handed out in contiguous blocks ordered by worker id. When `n` is not divisible by the
//! number of workers, the first `n % num_workers` workers each receive one extra row. Assignments
//! are pure functions of `(n, num_workers, worker)`; nothing here is stored between calls.
use crate::error::{DimensionError, GemmResult};

use std::ops::Range;

/// The contiguous block of rows owned by a single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowSplit {
    /// number of rows owned by the worker
    pub local_rows: usize,
    /// global index of the first owned row
    pub row_offset: usize,
}

impl RowSplit {
    /// The half open range of global row indices `[row_offset, row_offset + local_rows)`
    pub fn range(&self) -> Range<usize> {
        self.row_offset..self.row_offset + self.local_rows
    }

    pub fn is_empty(&self) -> bool {
        self.local_rows == 0
    }
}

fn check_world(n: usize, num_workers: usize) -> GemmResult<()> {
    if n == 0 {
        return Err(DimensionError::ZeroSize.into());
    }
    if num_workers == 0 {
        return Err(DimensionError::ZeroWorkers.into());
    }
    Ok(())
}

/// Compute the rows owned by `worker` when `n` rows are split across `num_workers` workers.
///
/// `local_rows = n / P + (worker < n % P)` and `row_offset = worker * (n / P) + min(worker, n % P)`.
///
/// # Examples
///```
/// use lamellar_gemm::compute_row_split;
///
/// let split = compute_row_split(7, 3, 1).unwrap();
/// assert_eq!(split.range(), 3..5);
///```
pub fn compute_row_split(n: usize, num_workers: usize, worker: usize) -> GemmResult<RowSplit> {
    check_world(n, num_workers)?;
    if worker >= num_workers {
        return Err(DimensionError::WorkerOutOfRange {
            worker,
            num_workers,
        }
        .into());
    }
    let base = n / num_workers;
    let remainder = n % num_workers;
    Ok(RowSplit {
        local_rows: base + if worker < remainder { 1 } else { 0 },
        row_offset: worker * base + worker.min(remainder),
    })
}

/// The full worker-to-rows mapping for a given `(n, num_workers)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowAssignment {
    n: usize,
    num_workers: usize,
}

impl RowAssignment {
    pub fn new(n: usize, num_workers: usize) -> GemmResult<RowAssignment> {
        check_world(n, num_workers)?;
        Ok(RowAssignment { n, num_workers })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// The split owned by `worker`
    pub fn split(&self, worker: usize) -> GemmResult<RowSplit> {
        compute_row_split(self.n, self.num_workers, worker)
    }

    /// Iterate over every worker's split in worker id order
    pub fn iter(&self) -> impl Iterator<Item = RowSplit> + '_ {
        (0..self.num_workers).map(move |worker| {
            let base = self.n / self.num_workers;
            let remainder = self.n % self.num_workers;
            RowSplit {
                local_rows: base + if worker < remainder { 1 } else { 0 },
                row_offset: worker * base + worker.min(remainder),
            }
        })
    }

    /// The worker that owns global row `row`
    pub fn worker_for_row(&self, row: usize) -> GemmResult<usize> {
        if row >= self.n {
            return Err(DimensionError::RowOutOfRange { row, n: self.n }.into());
        }
        let base = self.n / self.num_workers;
        let remainder = self.n % self.num_workers;
        // the first `remainder` workers hold base+1 rows each
        let wide_rows = remainder * (base + 1);
        if row < wide_rows {
            Ok(row / (base + 1))
        } else {
            Ok(remainder + (row - wide_rows) / base)
        }
    }

    /// True when every worker owns the same number of rows
    pub fn is_even(&self) -> bool {
        self.n % self.num_workers == 0
    }
}
