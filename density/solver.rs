//! # Least-Squares System Solver
//!
//! Score-matching systems are routinely close to singular, especially for
//! extreme kernel bandwidths or many input dimensions. The solve therefore goes
//! through a thin singular value decomposition and returns the minimum-norm
//! least-squares solution `A^+ b`, never a Cholesky or LDLT factorization that
//! would either fail or silently amplify error on such inputs.
//!
//! Conditioning is reported, not enforced: the squared singular values (the
//! eigenvalues of a symmetric PSD `A`) are logged and returned so callers can
//! decide whether the fit is trustworthy.

use ndarray::{Array1, Array2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{JobSvd, SVDDC};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("System matrix must be square, got {rows}x{cols}.")]
    NotSquare { rows: usize, cols: usize },
    #[error("Right-hand side has length {found}, but the system matrix has {expected} rows.")]
    RhsLength { expected: usize, found: usize },
    #[error("Cannot solve an empty linear system.")]
    Empty,
    #[error("Singular value decomposition failed: {0}")]
    Decomposition(#[from] LinalgError),
    #[error("Singular value decomposition did not return the requested singular vectors.")]
    MissingSingularVectors,
}

/// A dense square system `A x = b` produced by a model's assembler.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    pub matrix: Array2<f64>,
    pub rhs: Array1<f64>,
}

impl LinearSystem {
    pub fn new(matrix: Array2<f64>, rhs: Array1<f64>) -> Self {
        Self { matrix, rhs }
    }

    pub fn size(&self) -> usize {
        self.rhs.len()
    }
}

/// Range of the squared singular values of a solved system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spectrum {
    pub min: f64,
    pub max: f64,
}

impl Spectrum {
    fn from_singular_values(singular: &Array1<f64>) -> Self {
        singular.iter().map(|s| s * s).fold(
            Self {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            },
            |acc, value| Self {
                min: acc.min.min(value),
                max: acc.max.max(value),
            },
        )
    }

    pub fn log_min(&self) -> f64 {
        self.min.ln()
    }

    pub fn log_max(&self) -> f64 {
        self.max.ln()
    }

    /// Ratio of the largest to the smallest squared singular value.
    pub fn condition(&self) -> f64 {
        self.max / self.min
    }
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub coefficients: Array1<f64>,
    pub spectrum: Spectrum,
    /// Number of singular values kept by the pseudo-inverse.
    pub rank: usize,
}

/// Solves `system` in the least-squares sense via a thin SVD.
pub fn solve_svd(system: &LinearSystem) -> Result<Solution, SolverError> {
    let (rows, cols) = system.matrix.dim();
    if rows != cols {
        return Err(SolverError::NotSquare { rows, cols });
    }
    if system.rhs.len() != rows {
        return Err(SolverError::RhsLength {
            expected: rows,
            found: system.rhs.len(),
        });
    }
    if rows == 0 {
        return Err(SolverError::Empty);
    }

    log::info!("Solving with SVD.");
    let (u, singular, vt) = system.matrix.svddc(JobSvd::Some)?;
    let (Some(u), Some(vt)) = (u, vt) else {
        return Err(SolverError::MissingSingularVectors);
    };

    let sigma_max = singular.iter().cloned().fold(0.0_f64, f64::max);
    let cutoff = (sigma_max * rows.max(cols) as f64 * f64::EPSILON).max(f64::MIN_POSITIVE);

    let projected = u.t().dot(&system.rhs);
    let mut rank = 0usize;
    let scaled = Array1::from_shape_fn(singular.len(), |i| {
        if singular[i] > cutoff {
            rank += 1;
            projected[i] / singular[i]
        } else {
            0.0
        }
    });
    let coefficients = vt.t().dot(&scaled);

    let spectrum = Spectrum::from_singular_values(&singular);
    log::info!(
        "Eigenspectrum range is [{:e}, {:e}], or [exp({:.6}), exp({:.6})].",
        spectrum.min,
        spectrum.max,
        spectrum.log_min(),
        spectrum.log_max()
    );

    if rank < singular.len() {
        log::warn!(
            "System of size {} is numerically rank deficient: kept {} of {} singular values.",
            rows,
            rank,
            singular.len()
        );
    }
    if coefficients.iter().any(|c| !c.is_finite()) {
        log::warn!("Numerical problems solving system: non-finite coefficients.");
    }

    Ok(Solution {
        coefficients,
        spectrum,
        rank,
    })
}
