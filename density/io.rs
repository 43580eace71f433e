//! # Point Matrix Input and Output
//!
//! Point files are tab-separated with one header row. Every data row is one
//! point and every column one input dimension; the loader transposes them into
//! the `D x N` layout used everywhere else. Failures are assumed to be
//! user-input errors and carry the row and column that caused them.

use ndarray::{Array1, Array2};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Error reading tab-separated data: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Value '{value}' in row {row}, column '{column}' is not a number.")]
    Unparsable {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Row {row} has {found} values, but the header declares {expected} columns.")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Non-finite value (NaN or Infinity) in row {row}, column '{column}'.")]
    NonFinite { row: usize, column: String },
    #[error("The input file has no header columns.")]
    NoColumns,
    #[error("The input file contains no data rows.")]
    NoRows,
}

/// Loads a point matrix from a tab-separated file; returns `D x N`.
pub fn load_points(path: impl AsRef<Path>) -> Result<Array2<f64>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(DataError::NoColumns);
    }
    let dimension = headers.len();

    let mut values = Vec::new();
    let mut num_points = 0usize;
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        // Header is row 1.
        let row = idx + 2;
        if record.len() != dimension {
            return Err(DataError::RaggedRow {
                row,
                expected: dimension,
                found: record.len(),
            });
        }
        for (field, column) in record.iter().zip(&headers) {
            let value: f64 = field.trim().parse().map_err(|_| DataError::Unparsable {
                row,
                column: column.clone(),
                value: field.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DataError::NonFinite {
                    row,
                    column: column.clone(),
                });
            }
            values.push(value);
        }
        num_points += 1;
    }

    if num_points == 0 {
        return Err(DataError::NoRows);
    }

    // Row-major N x D read order; the transpose yields one column per point.
    let by_row = Array2::from_shape_vec((num_points, dimension), values)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(by_row.reversed_axes().as_standard_layout().into_owned())
}

/// Per-point evaluation results written by [`save_evaluations`].
pub struct Evaluations<'a> {
    pub log_pdf: &'a Array1<f64>,
    /// `D x N` gradients, one column per point.
    pub grad: &'a Array2<f64>,
}

/// Writes one row per test point: `point`, `log_pdf`, `grad_1` .. `grad_D`.
pub fn save_evaluations(
    path: impl AsRef<Path>,
    evaluations: &Evaluations<'_>,
) -> Result<(), DataError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;

    let dimension = evaluations.grad.nrows();
    let mut header = vec!["point".to_string(), "log_pdf".to_string()];
    header.extend((1..=dimension).map(|d| format!("grad_{d}")));
    writer.write_record(&header)?;

    for (i, gradient) in evaluations.grad.columns().into_iter().enumerate() {
        let mut row = vec![i.to_string(), evaluations.log_pdf[i].to_string()];
        row.extend(gradient.iter().map(|g| g.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
