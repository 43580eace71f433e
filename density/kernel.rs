//! # Kernel Gateway
//!
//! The estimator never touches kernel formulas directly. It only tells the
//! kernel which point sets play the left (training) and right (test) roles and
//! asks it to refresh its cached tables. Models reach the derivative
//! primitives through [`ScoreKernel`].
//!
//! All primitives are indexed by a column `a` of the left operand and a column
//! `b` of the right operand, and derivatives are taken with respect to the
//! right-hand point `y = rhs[:, b]`.

use crate::data::SharedPoints;
use ndarray::{Array1, Array2, ArrayView1, Zip};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("Kernel bandwidth must be a positive finite number, got {0}.")]
    InvalidBandwidth(f64),
    #[error(
        "Point dimension mismatch: the left operand has {lhs} dimensions but the right operand has {rhs}."
    )]
    DimensionMismatch { lhs: usize, rhs: usize },
    #[error("The {0} operand of the kernel contains no points.")]
    EmptyPoints(&'static str),
}

/// Operand management shared by every kernel the estimator can own.
pub trait Kernel: Send + Sync {
    /// Replaces the left operand. Any right operand and cached tables from
    /// earlier use are dropped, so `set_rhs` must follow.
    fn set_lhs(&mut self, lhs: SharedPoints) -> Result<(), KernelError>;

    /// Replaces the right operand. Implementations must reject a matrix whose
    /// dimension differs from the current left operand.
    fn set_rhs(&mut self, rhs: SharedPoints) -> Result<(), KernelError>;

    /// Refreshes cached tables for the current operands. Calling it again
    /// without changing an operand does no work.
    fn precompute(&mut self);
}

/// Derivative primitives consumed by score-matching models.
pub trait ScoreKernel: Kernel {
    /// `k(lhs_a, rhs_b)`.
    ///
    /// # Panics
    /// If either operand is unset, or `a`/`b` is not a column of its operand.
    fn value(&self, a: usize, b: usize) -> f64;

    /// Gradient of `k(lhs_a, y)` at `y = rhs_b`.
    ///
    /// # Panics
    /// If either operand is unset, or `a`/`b` is not a column of its operand.
    fn grad_rhs(&self, a: usize, b: usize) -> Array1<f64>;

    /// Diagonal of the Hessian of `k(lhs_a, y)` at `y = rhs_b`.
    ///
    /// # Panics
    /// If either operand is unset, or `a`/`b` is not a column of its operand.
    fn hessian_diag_rhs(&self, a: usize, b: usize) -> Array1<f64>;
}

#[derive(Debug, Clone)]
struct KernelCache {
    lhs: SharedPoints,
    rhs: SharedPoints,
    values: Array2<f64>,
}

impl KernelCache {
    fn is_valid_for(&self, lhs: &SharedPoints, rhs: &SharedPoints) -> bool {
        Arc::ptr_eq(&self.lhs, lhs) && Arc::ptr_eq(&self.rhs, rhs)
    }
}

/// Gaussian kernel `k(x, y) = exp(-|x - y|^2 / sigma)`.
#[derive(Debug, Clone)]
pub struct GaussianKernel {
    sigma: f64,
    lhs: Option<SharedPoints>,
    rhs: Option<SharedPoints>,
    cache: Option<KernelCache>,
}

impl GaussianKernel {
    pub fn new(sigma: f64) -> Result<Self, KernelError> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(KernelError::InvalidBandwidth(sigma));
        }
        Ok(Self {
            sigma,
            lhs: None,
            rhs: None,
            cache: None,
        })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Whether cached values exist for the operands currently set.
    pub fn is_precomputed(&self) -> bool {
        match (&self.cache, &self.lhs, &self.rhs) {
            (Some(cache), Some(lhs), Some(rhs)) => cache.is_valid_for(lhs, rhs),
            _ => false,
        }
    }

    fn evaluate(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let sq_dist: f64 = x
            .iter()
            .zip(y.iter())
            .map(|(&xi, &yi)| (xi - yi) * (xi - yi))
            .sum();
        (-sq_dist / self.sigma).exp()
    }

    fn operands(&self) -> (&SharedPoints, &SharedPoints) {
        match (&self.lhs, &self.rhs) {
            (Some(lhs), Some(rhs)) => (lhs, rhs),
            _ => panic!("Gaussian kernel queried before both operands were set"),
        }
    }
}

impl Kernel for GaussianKernel {
    fn set_lhs(&mut self, lhs: SharedPoints) -> Result<(), KernelError> {
        if lhs.ncols() == 0 {
            return Err(KernelError::EmptyPoints("left"));
        }
        self.lhs = Some(lhs);
        self.rhs = None;
        self.cache = None;
        Ok(())
    }

    fn set_rhs(&mut self, rhs: SharedPoints) -> Result<(), KernelError> {
        if rhs.ncols() == 0 {
            return Err(KernelError::EmptyPoints("right"));
        }
        if let Some(lhs) = &self.lhs {
            if lhs.nrows() != rhs.nrows() {
                return Err(KernelError::DimensionMismatch {
                    lhs: lhs.nrows(),
                    rhs: rhs.nrows(),
                });
            }
        }
        self.rhs = Some(rhs);
        Ok(())
    }

    fn precompute(&mut self) {
        let (Some(lhs), Some(rhs)) = (self.lhs.clone(), self.rhs.clone()) else {
            log::debug!("Skipping kernel precompute: operands not set.");
            return;
        };
        if self.is_precomputed() {
            return;
        }

        log::debug!(
            "Precomputing Gaussian kernel table of size {}x{}.",
            lhs.ncols(),
            rhs.ncols()
        );
        let mut values = Array2::<f64>::zeros((lhs.ncols(), rhs.ncols()));
        let kernel = &*self;
        Zip::indexed(&mut values).par_for_each(|(a, b), value| {
            *value = kernel.evaluate(lhs.column(a), rhs.column(b));
        });

        self.cache = Some(KernelCache { lhs, rhs, values });
    }
}

impl ScoreKernel for GaussianKernel {
    fn value(&self, a: usize, b: usize) -> f64 {
        let (lhs, rhs) = self.operands();
        match &self.cache {
            Some(cache) if cache.is_valid_for(lhs, rhs) => cache.values[(a, b)],
            _ => self.evaluate(lhs.column(a), rhs.column(b)),
        }
    }

    fn grad_rhs(&self, a: usize, b: usize) -> Array1<f64> {
        let (lhs, rhs) = self.operands();
        let k = self.value(a, b);
        let scale = 2.0 * k / self.sigma;
        (&lhs.column(a) - &rhs.column(b)) * scale
    }

    fn hessian_diag_rhs(&self, a: usize, b: usize) -> Array1<f64> {
        let (lhs, rhs) = self.operands();
        let k = self.value(a, b);
        let sigma = self.sigma;
        (&lhs.column(a) - &rhs.column(b))
            .mapv(|diff| k * (4.0 * diff * diff / (sigma * sigma) - 2.0 / sigma))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn operand_pair() -> (SharedPoints, SharedPoints) {
        let lhs = Arc::new(array![[0.0, 1.0, -0.5], [0.5, -1.0, 2.0]]);
        let rhs = Arc::new(array![[0.2, -0.3], [0.1, 0.4]]);
        (lhs, rhs)
    }

    #[test]
    fn rejects_non_positive_bandwidth() {
        assert_eq!(
            GaussianKernel::new(0.0).unwrap_err(),
            KernelError::InvalidBandwidth(0.0)
        );
        assert!(GaussianKernel::new(-1.0).is_err());
        assert!(GaussianKernel::new(f64::NAN).is_err());
    }

    #[test]
    fn rejects_rhs_with_wrong_dimension() {
        let (lhs, _) = operand_pair();
        let mut kernel = GaussianKernel::new(1.0).unwrap();
        kernel.set_lhs(lhs).unwrap();
        let err = kernel
            .set_rhs(Arc::new(Array2::zeros((3, 4))))
            .unwrap_err();
        assert_eq!(err, KernelError::DimensionMismatch { lhs: 2, rhs: 3 });
    }

    #[test]
    fn new_lhs_discards_previous_operands() {
        let (lhs, rhs) = operand_pair();
        let mut kernel = GaussianKernel::new(1.0).unwrap();
        kernel.set_lhs(lhs).unwrap();
        kernel.set_rhs(rhs).unwrap();
        kernel.precompute();

        let wider = Arc::new(Array2::from_elem((3, 2), 0.5));
        kernel.set_lhs(Arc::clone(&wider)).unwrap();
        assert!(!kernel.is_precomputed());
        kernel.set_rhs(Arc::clone(&wider)).unwrap();
        kernel.precompute();
        assert!(kernel.is_precomputed());
        assert_abs_diff_eq!(kernel.value(0, 1), 1.0, epsilon = 1e-15);
    }

    #[test]
    fn rejects_empty_rhs() {
        let (lhs, _) = operand_pair();
        let mut kernel = GaussianKernel::new(1.0).unwrap();
        kernel.set_lhs(lhs).unwrap();
        assert_eq!(
            kernel.set_rhs(Arc::new(Array2::zeros((2, 0)))).unwrap_err(),
            KernelError::EmptyPoints("right")
        );
    }

    #[test]
    fn cached_values_match_direct_evaluation() {
        let (lhs, rhs) = operand_pair();
        let mut kernel = GaussianKernel::new(1.5).unwrap();
        kernel.set_lhs(Arc::clone(&lhs)).unwrap();
        kernel.set_rhs(Arc::clone(&rhs)).unwrap();

        let direct: Vec<f64> = (0..3)
            .flat_map(|a| (0..2).map(move |b| (a, b)))
            .map(|(a, b)| kernel.value(a, b))
            .collect();
        assert!(!kernel.is_precomputed());

        kernel.precompute();
        assert!(kernel.is_precomputed());
        let cached: Vec<f64> = (0..3)
            .flat_map(|a| (0..2).map(move |b| (a, b)))
            .map(|(a, b)| kernel.value(a, b))
            .collect();
        assert_eq!(direct, cached);

        let sq = (0.0_f64 - 0.2).powi(2) + (0.5_f64 - 0.1).powi(2);
        assert_abs_diff_eq!(kernel.value(0, 0), (-sq / 1.5).exp(), epsilon = 1e-15);
    }

    #[test]
    fn replacing_rhs_invalidates_cache() {
        let (lhs, rhs) = operand_pair();
        let mut kernel = GaussianKernel::new(1.0).unwrap();
        kernel.set_lhs(Arc::clone(&lhs)).unwrap();
        kernel.set_rhs(rhs).unwrap();
        kernel.precompute();
        assert!(kernel.is_precomputed());

        kernel.set_rhs(Arc::clone(&lhs)).unwrap();
        assert!(!kernel.is_precomputed());
        assert_abs_diff_eq!(kernel.value(1, 1), 1.0, epsilon = 1e-15);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let (lhs, rhs) = operand_pair();
        let sigma = 0.8;
        let h = 1e-5;
        let mut kernel = GaussianKernel::new(sigma).unwrap();
        kernel.set_lhs(Arc::clone(&lhs)).unwrap();
        kernel.set_rhs(Arc::clone(&rhs)).unwrap();
        kernel.precompute();

        let grad = kernel.grad_rhs(2, 1);
        let hess = kernel.hessian_diag_rhs(2, 1);
        let x = lhs.column(2).to_owned();
        let y = rhs.column(1).to_owned();
        let k = |point: &Array1<f64>| kernel.evaluate(x.view(), point.view());

        for d in 0..2 {
            let mut plus = y.clone();
            plus[d] += h;
            let mut minus = y.clone();
            minus[d] -= h;
            let numeric_grad = (k(&plus) - k(&minus)) / (2.0 * h);
            let numeric_hess = (k(&plus) - 2.0 * k(&y) + k(&minus)) / (h * h);
            assert_abs_diff_eq!(grad[d], numeric_grad, epsilon = 1e-8);
            assert_abs_diff_eq!(hess[d], numeric_hess, epsilon = 1e-4);
        }
    }
}
