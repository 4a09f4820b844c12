// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::archive::{Archive, InputArchiver, OutputArchiver};
use crate::errors::ArchiveError;

/// Dense row-major 2-D numeric block. Archived as rows, cols, then the
/// element run, so a peer can rebuild it without knowing the shape ahead
/// of time.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Matrix<T> {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![T::default(); rows * cols] }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Self {
        assert_eq!(rows * cols, data.len(), "matrix shape does not match element count");
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, r: usize, c: usize) -> T {
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, value: T) {
        self.data[r * self.cols + c] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: Archive + Copy + Default> Archive for Matrix<T> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        let mut n = ar.put_size(self.rows) + ar.put_size(self.cols);
        for item in &self.data {
            n += item.archive(ar);
        }
        n
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let rows = ar.take_size()?;
        let cols = ar.take_size()?;
        let mut data = Vec::with_capacity(rows * cols);
        for _ in 0..rows * cols {
            data.push(T::unarchive(ar)?);
        }
        Ok(Self { rows, cols, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_is_row_major() {
        let mut m = Matrix::<f64>::zeros(2, 3);
        m.set(1, 2, 42.0);
        assert_eq!(m.get(1, 2), 42.0);
        assert_eq!(m.as_slice()[5], 42.0);
    }

    #[test]
    #[should_panic(expected = "shape does not match")]
    fn from_vec_rejects_bad_shape() {
        let _ = Matrix::from_vec(2, 2, vec![1.0f32, 2.0, 3.0]);
    }
}
