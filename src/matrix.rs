use crate::error::{DimensionError, GemmResult};

use matrixmultiply::dgemm;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A dense, row-major matrix of `f64`
///
/// Matrices with zero rows or zero columns are valid; a worker owns zero rows whenever there are more
/// workers than rows.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Wrap a row-major buffer, checking that `data.len() == rows * cols`
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> GemmResult<Matrix> {
        if data.len() != rows * cols {
            return Err(DimensionError::DataLength {
                expected: rows * cols,
                found: data.len(),
            }
            .into());
        }
        Ok(Matrix { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Matrix
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                data.push(f(row, col));
            }
        }
        Matrix { rows, cols, data }
    }

    /// A matrix whose entries are drawn independently and uniformly from `[0, 1)`
    pub fn random<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        let data = (0..rows * cols).map(|_| rng.gen::<f64>()).collect();
        Matrix { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// # Panics
    /// Panics if `row >= rows()` or `col >= cols()`
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    /// # Panics
    /// Panics if `row >= rows()` or `col >= cols()`
    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        self.data[row * self.cols + col] = val;
    }

    /// Borrow one row.
    ///
    /// # Panics
    /// Panics if `row >= rows()`
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Copy out one column.
    ///
    /// # Panics
    /// Panics if `col >= cols()`
    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.rows).map(|row| self.get(row, col)).collect()
    }

    /// Copy out the rows in `range`
    pub fn row_slice(&self, range: Range<usize>) -> GemmResult<Matrix> {
        if range.start > range.end || range.end > self.rows {
            return Err(DimensionError::RowOutOfRange {
                row: range.end,
                n: self.rows,
            }
            .into());
        }
        Ok(Matrix {
            rows: range.len(),
            cols: self.cols,
            data: self.data[range.start * self.cols..range.end * self.cols].to_vec(),
        })
    }

    /// Copy out the columns in `range`
    pub fn col_slice(&self, range: Range<usize>) -> GemmResult<Matrix> {
        if range.start > range.end || range.end > self.cols {
            return Err(DimensionError::RowOutOfRange {
                row: range.end,
                n: self.cols,
            }
            .into());
        }
        let width = range.len();
        let mut data = Vec::with_capacity(self.rows * width);
        for row in 0..self.rows {
            let start = row * self.cols;
            data.extend_from_slice(&self.data[start + range.start..start + range.end]);
        }
        Ok(Matrix {
            rows: self.rows,
            cols: width,
            data,
        })
    }

    /// Place `block` at rows `[row_offset, row_offset + block.rows())` of an otherwise zero `rows x block.cols()` matrix
    pub fn embed_rows(rows: usize, row_offset: usize, block: &Matrix) -> GemmResult<Matrix> {
        if row_offset + block.rows > rows {
            return Err(DimensionError::RowOutOfRange {
                row: row_offset + block.rows,
                n: rows,
            }
            .into());
        }
        let mut padded = Matrix::zeros(rows, block.cols);
        let start = row_offset * block.cols;
        padded.data[start..start + block.data.len()].copy_from_slice(&block.data);
        Ok(padded)
    }

    /// Concatenate blocks along the column axis, left to right in iteration order.
    ///
    /// Every block must have the same number of rows.
    pub fn concat_cols<'a, I>(blocks: I) -> GemmResult<Matrix>
    where
        I: IntoIterator<Item = &'a Matrix>,
    {
        let blocks = blocks.into_iter().collect::<Vec<_>>();
        let rows = match blocks.first() {
            Some(first) => first.rows,
            None => return Ok(Matrix::zeros(0, 0)),
        };
        for block in &blocks {
            if block.rows != rows {
                return Err(DimensionError::RaggedBlocks {
                    expected_rows: rows,
                    found_rows: block.rows,
                }
                .into());
            }
        }
        let cols = blocks.iter().map(|b| b.cols).sum::<usize>();
        let mut data = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for block in &blocks {
                data.extend_from_slice(block.row(row));
            }
        }
        Ok(Matrix { rows, cols, data })
    }

    /// Elementwise `self += other`
    pub fn add_assign(&mut self, other: &Matrix) -> GemmResult<()> {
        if self.shape() != other.shape() {
            return Err(DimensionError::ShapeMismatch {
                expected: self.shape(),
                found: other.shape(),
            }
            .into());
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += *b;
        }
        Ok(())
    }

    /// Dense matrix product `self * other`, computed by the `matrixmultiply` dgemm kernel
    pub fn multiply(&self, other: &Matrix) -> GemmResult<Matrix> {
        if self.cols != other.rows {
            return Err(DimensionError::InnerMismatch {
                lhs: self.shape(),
                rhs: other.shape(),
            }
            .into());
        }
        let (m, k, n) = (self.rows, self.cols, other.cols);
        let mut res = Matrix::zeros(m, n);
        if m == 0 || k == 0 || n == 0 {
            return Ok(res);
        }
        unsafe {
            dgemm(
                m,
                k,
                n,
                1.0,
                self.data.as_ptr(),
                k as isize,
                1,
                other.data.as_ptr(),
                n as isize,
                1,
                0.0,
                res.data.as_mut_ptr(),
                n as isize,
                1,
            );
        }
        Ok(res)
    }

    /// The largest `|a - b| / max(|a|, |b|, 1)` over all entries, or infinity when the shapes differ
    pub fn max_relative_error(&self, other: &Matrix) -> f64 {
        if self.shape() != other.shape() {
            return f64::INFINITY;
        }
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).abs() / a.abs().max(b.abs()).max(1.0))
            .fold(0.0, f64::max)
    }

    pub fn approx_eq(&self, other: &Matrix, tolerance: f64) -> bool {
        self.max_relative_error(other) <= tolerance
    }
}

/// Sum of elementwise products, the single entry of a row times a column
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GemmError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn naive(a: &Matrix, b: &Matrix) -> Matrix {
        Matrix::from_fn(a.rows(), b.cols(), |i, j| dot(a.row(i), &b.column(j)))
    }

    #[test]
    fn multiply_matches_naive_product() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = Matrix::random(5, 3, &mut rng);
        let b = Matrix::random(3, 4, &mut rng);
        let c = a.multiply(&b).unwrap();
        assert_eq!(c.shape(), (5, 4));
        assert!(c.approx_eq(&naive(&a, &b), 1e-12));
    }

    #[test]
    fn multiply_small_known_values() {
        let a = Matrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Matrix::new(2, 2, vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        let c = a.multiply(&b).unwrap();
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn multiply_rejects_inner_mismatch() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(4, 2);
        assert_eq!(
            a.multiply(&b),
            Err(GemmError::InvalidDimension(DimensionError::InnerMismatch {
                lhs: (2, 3),
                rhs: (4, 2)
            }))
        );
    }

    #[test]
    fn multiply_with_empty_dimension() {
        let a = Matrix::zeros(0, 4);
        let b = Matrix::zeros(4, 3);
        assert_eq!(a.multiply(&b).unwrap().shape(), (0, 3));
        let a = Matrix::zeros(3, 0);
        let b = Matrix::zeros(0, 2);
        assert_eq!(a.multiply(&b).unwrap(), Matrix::zeros(3, 2));
    }

    #[test]
    fn random_entries_are_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(1);
        let m = Matrix::random(20, 20, &mut rng);
        assert!(m.as_slice().iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn slices_and_concat_reassemble() {
        let m = Matrix::from_fn(3, 5, |i, j| (i * 10 + j) as f64);
        let left = m.col_slice(0..2).unwrap();
        let right = m.col_slice(2..5).unwrap();
        assert_eq!(left.shape(), (3, 2));
        assert_eq!(right.get(1, 0), 12.0);
        assert_eq!(Matrix::concat_cols([&left, &right]).unwrap(), m);
        let middle = m.row_slice(1..2).unwrap();
        assert_eq!(middle.as_slice(), &[10.0, 11.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn concat_rejects_ragged_blocks() {
        let a = Matrix::zeros(2, 2);
        let b = Matrix::zeros(3, 2);
        assert!(Matrix::concat_cols([&a, &b]).is_err());
    }

    #[test]
    fn embed_rows_zero_pads() {
        let block = Matrix::new(1, 2, vec![1.0, 2.0]).unwrap();
        let padded = Matrix::embed_rows(3, 1, &block).unwrap();
        assert_eq!(padded.as_slice(), &[0.0, 0.0, 1.0, 2.0, 0.0, 0.0]);
        assert!(Matrix::embed_rows(3, 3, &block).is_err());
    }

    #[test]
    fn add_assign_checks_shapes() {
        let mut a = Matrix::new(1, 2, vec![1.0, 2.0]).unwrap();
        a.add_assign(&Matrix::new(1, 2, vec![0.5, 0.5]).unwrap()).unwrap();
        assert_eq!(a.as_slice(), &[1.5, 2.5]);
        assert!(a.add_assign(&Matrix::zeros(2, 1)).is_err());
    }

    #[test]
    fn new_checks_buffer_length() {
        assert!(Matrix::new(2, 2, vec![0.0; 3]).is_err());
    }
}
