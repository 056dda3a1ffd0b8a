//! Core data types: dense numeric matrices and the dated return table.

use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Dense 2D array of `f32`, stored column-major.
///
/// Rows are time steps and columns are series (assets or strategies). Column-major
/// storage makes every column, and every run of adjacent columns, one contiguous
/// slice, which is what lets the executor hand disjoint column blocks to workers.
/// Missing observations are `NaN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Create a matrix where every cell is missing.
    pub fn nan(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, f32::NAN)
    }

    /// Create a matrix with every cell set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Build a matrix from equally sized columns.
    pub fn from_columns(columns: Vec<Vec<f32>>) -> Result<Self> {
        let cols = columns.len();
        let rows = columns.first().map(|c| c.len()).unwrap_or(0);
        if let Some(bad) = columns.iter().position(|c| c.len() != rows) {
            return Err(BacktestError::ShapeMismatch(format!(
                "column {} has {} rows, expected {}",
                bad,
                columns[bad].len(),
                rows
            )));
        }
        let mut data = Vec::with_capacity(rows * cols);
        for column in columns {
            data.extend(column);
        }
        Ok(Self { rows, cols, data })
    }

    /// Build a matrix from equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let n_rows = rows.len();
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().position(|r| r.len() != cols) {
            return Err(BacktestError::ShapeMismatch(format!(
                "row {} has {} columns, expected {}",
                bad,
                rows[bad].len(),
                cols
            )));
        }
        let mut matrix = Self::nan(n_rows, cols);
        for (r, row) in rows.iter().enumerate() {
            for (c, &value) in row.iter().enumerate() {
                matrix.set(r, c, value);
            }
        }
        Ok(matrix)
    }

    /// Build a matrix from `f64` columns, narrowing to `f32`.
    pub fn from_f64_columns(columns: Vec<Vec<f64>>) -> Result<Self> {
        Self::from_columns(
            columns
                .into_iter()
                .map(|c| c.into_iter().map(|v| v as f32).collect())
                .collect(),
        )
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[col * self.rows + row]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[col * self.rows + row] = value;
    }

    pub fn column(&self, col: usize) -> &[f32] {
        &self.data[col * self.rows..(col + 1) * self.rows]
    }

    pub fn column_mut(&mut self, col: usize) -> &mut [f32] {
        &mut self.data[col * self.rows..(col + 1) * self.rows]
    }

    /// Column widened to `f64` for numeric work.
    pub fn column_f64(&self, col: usize) -> Vec<f64> {
        self.column(col).iter().map(|&v| v as f64).collect()
    }

    /// Iterate over columns in order.
    pub fn columns(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.cols).map(move |c| self.column(c))
    }

    /// Copy one row out of the matrix.
    pub fn row(&self, row: usize) -> Vec<f32> {
        (0..self.cols).map(|c| self.get(row, c)).collect()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Keep only the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Matrix {
        let mut out = Matrix::nan(rows.len(), self.cols);
        for c in 0..self.cols {
            let src = self.column(c);
            let dst = out.column_mut(c);
            for (i, &r) in rows.iter().enumerate() {
                dst[i] = src[r];
            }
        }
        out
    }

    /// Keep only the given columns, in the given order.
    pub fn select_columns(&self, cols: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(self.rows * cols.len());
        for &c in cols {
            data.extend_from_slice(self.column(c));
        }
        Matrix {
            rows: self.rows,
            cols: cols.len(),
            data,
        }
    }

    /// Element-wise combination of two matrices of identical shape.
    pub fn zip_map<F>(&self, other: &Matrix, f: F) -> Result<Matrix>
    where
        F: Fn(f32, f32) -> f32,
    {
        if self.shape() != other.shape() {
            return Err(BacktestError::ShapeMismatch(format!(
                "{:?} vs {:?}",
                self.shape(),
                other.shape()
            )));
        }
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// True when every cell in `row` is missing.
    pub fn row_is_empty(&self, row: usize) -> bool {
        (0..self.cols).all(|c| self.get(row, c).is_nan())
    }

    /// Count of non-missing cells.
    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Dated percentage-return table: rows are dates, columns are assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnMatrix {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    values: Matrix,
}

impl ReturnMatrix {
    /// Wrap a matrix with its date index and asset names.
    ///
    /// Fails loudly on any shape disagreement rather than truncating.
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, values: Matrix) -> Result<Self> {
        if dates.len() != values.rows() {
            return Err(BacktestError::ShapeMismatch(format!(
                "{} dates for {} rows",
                dates.len(),
                values.rows()
            )));
        }
        if assets.len() != values.cols() {
            return Err(BacktestError::ShapeMismatch(format!(
                "{} asset names for {} columns",
                assets.len(),
                values.cols()
            )));
        }
        let mut seen = HashSet::with_capacity(assets.len());
        if let Some(duplicate) = assets.iter().find(|a| !seen.insert(a.as_str())) {
            return Err(BacktestError::DataError(format!(
                "asset '{}' appears more than once",
                duplicate
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BacktestError::DataError(
                "dates must be strictly ascending".to_string(),
            ));
        }
        Ok(Self {
            dates,
            assets,
            values,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn values(&self) -> &Matrix {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Column index of an asset.
    pub fn asset_index(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    /// Restrict the table to `assets`, in that order.
    pub fn select_assets(&self, assets: &[String]) -> Result<ReturnMatrix> {
        let indices = assets
            .iter()
            .map(|a| {
                self.asset_index(a).ok_or_else(|| {
                    BacktestError::ConfigError(format!("asset '{}' not in return table", a))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            dates: self.dates.clone(),
            assets: assets.to_vec(),
            values: self.values.select_columns(&indices),
        })
    }
}
