//! Owned numeric buffers: a dense `Vector` and a row-major `Matrix` of `f32`.
//!
//! Both types have value semantics. `clone` yields an independent buffer and a
//! move hands the buffer over; `std::mem::take` leaves an empty value behind.
//! Checked accessors return [`NetError`]; the operator forms panic instead.
use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Index, IndexMut};

/// Fixed-length vector of `f32`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    /// Zero-filled vector of the given length.
    pub fn zeros(len: usize) -> Self {
        Self { data: vec![0.0; len] }
    }

    pub fn from_vec(data: Vec<f32>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f32> {
        self.data.iter()
    }

    pub fn get(&self, index: usize) -> Result<f32> {
        self.data.get(index).copied().ok_or(NetError::IndexOutOfRange {
            index,
            len: self.data.len(),
        })
    }

    pub fn set(&mut self, index: usize, value: f32) -> Result<()> {
        let len = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(NetError::IndexOutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    /// Element-wise sum; fails when the lengths differ.
    pub fn try_add(&self, other: &Vector) -> Result<Vector> {
        if self.len() != other.len() {
            return Err(NetError::ShapeMismatch {
                op: "vector add",
                left: (self.len(), 1),
                right: (other.len(), 1),
            });
        }
        Ok(Vector::from_vec(
            self.data.iter().zip(&other.data).map(|(a, b)| a + b).collect(),
        ))
    }

    /// Index of the largest element. Ties go to the first occurrence.
    pub fn argmax(&self) -> Option<usize> {
        let first = *self.data.first()?;
        let (best, _) = self
            .data
            .iter()
            .enumerate()
            .skip(1)
            .fold((0, first), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });
        Some(best)
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Self::from_vec(data)
    }
}

impl Index<usize> for Vector {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        let len = self.data.len();
        self.data
            .get(index)
            .unwrap_or_else(|| panic!("{}", NetError::IndexOutOfRange { index, len }))
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, index: usize) -> &mut f32 {
        let len = self.data.len();
        self.data
            .get_mut(index)
            .unwrap_or_else(|| panic!("{}", NetError::IndexOutOfRange { index, len }))
    }
}

impl Add for &Vector {
    type Output = Vector;

    fn add(self, rhs: &Vector) -> Vector {
        self.try_add(rhs).unwrap_or_else(|e| panic!("{e}"))
    }
}

/// Row-major `rows x cols` matrix of `f32`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wraps a row-major buffer; its length must be `rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(NetError::ShapeMismatch {
                op: "matrix from buffer",
                left: (rows, cols),
                right: (data.len(), 1),
            });
        }
        Ok(Self { rows, cols, data })
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

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Row `row` as a slice.
    pub fn try_row(&self, row: usize) -> Result<&[f32]> {
        if row >= self.rows {
            return Err(NetError::IndexOutOfRange { index: row, len: self.rows });
        }
        Ok(&self.data[row * self.cols..(row + 1) * self.cols])
    }

    /// Panicking form of [`Matrix::try_row`], like indexing.
    pub fn row(&self, row: usize) -> &[f32] {
        match self.try_row(row) {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.rows {
            return Err(NetError::IndexOutOfRange { index: row, len: self.rows });
        }
        if col >= self.cols {
            return Err(NetError::IndexOutOfRange { index: col, len: self.cols });
        }
        Ok(row * self.cols + col)
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f32> {
        Ok(self.data[self.offset(row, col)?])
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) -> Result<()> {
        let at = self.offset(row, col)?;
        self.data[at] = value;
        Ok(())
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Matrix product `self · other`; requires `self.cols == other.rows`.
    pub fn try_mul(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.rows {
            return Err(NetError::ShapeMismatch {
                op: "matrix multiply",
                left: self.shape(),
                right: other.shape(),
            });
        }
        let mut out = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            let lhs = self.row(i);
            let dst = &mut out.data[i * other.cols..(i + 1) * other.cols];
            for (k, &a) in lhs.iter().enumerate() {
                for (d, &b) in dst.iter_mut().zip(other.row(k)) {
                    *d += a * b;
                }
            }
        }
        Ok(out)
    }

    /// Matrix-vector product `self · v`; requires `self.cols == v.len()`.
    pub fn try_mul_vec(&self, v: &Vector) -> Result<Vector> {
        if self.cols != v.len() {
            return Err(NetError::ShapeMismatch {
                op: "matrix-vector multiply",
                left: self.shape(),
                right: (v.len(), 1),
            });
        }
        Ok(Vector::from_vec(
            (0..self.rows)
                .map(|i| dot(self.row(i), v.as_slice()))
                .collect(),
        ))
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Index<(usize, usize)> for Matrix {
    type Output = f32;

    fn index(&self, (row, col): (usize, usize)) -> &f32 {
        match self.offset(row, col) {
            Ok(at) => &self.data[at],
            Err(e) => panic!("{e}"),
        }
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f32 {
        match self.offset(row, col) {
            Ok(at) => &mut self.data[at],
            Err(e) => panic!("{e}"),
        }
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            let cells: Vec<String> = self.row(r).iter().map(|v| format!("{v:>6.1}")).collect();
            writeln!(f, "{}", cells.join(" "))?;
        }
        Ok(())
    }
}
