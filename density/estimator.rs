//! # Kernel Exponential Family Estimator
//!
//! Fits an unnormalized log-density `f` by score matching and evaluates it at
//! test points. The engine is model agnostic: the linear system and the
//! per-point formulas come from a [`ScoreMatchingModel`], while the kernel
//! supplies cached pairwise quantities.
//!
//! Lifecycle:
//!
//! 1. Construction stores the training matrix as both train and test data and
//!    lets the kernel precompute its tables.
//! 2. `fit()` assembles `(A, b)`, solves it through a thin SVD and stores the
//!    coefficient vector.
//! 3. Density queries read the coefficients and the current test data. Batch
//!    queries fan out over test points with rayon; per-point hooks only read
//!    shared state, so the output order always matches the input order.
//!
//! `fit()` and `set_test_data()` take `&mut self`, so the borrow checker keeps
//! them from overlapping with any in-flight evaluation.

use crate::data::{PointStore, SharedPoints};
use crate::kernel::{KernelError, ScoreKernel};
use crate::solver::{self, LinearSystem, SolverError, Spectrum};
use crate::types::{Coefficients, Regularization};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("Regularization parameter lambda must be positive and finite, got {0}.")]
    InvalidLambda(f64),
    #[error("Training data must contain at least one point.")]
    EmptyTrainingData,
    #[error("The estimator has not been fitted. Call fit() before querying the density.")]
    NotFitted,
    #[error("Kernel rejected the operation: {0}")]
    Kernel(#[from] KernelError),
    #[error("Solving the score-matching system failed: {0}")]
    Solver(#[from] SolverError),
    #[error("The model assembled a system of size {found}, but declares size {expected}.")]
    SystemSizeMismatch { expected: usize, found: usize },
    #[error("Coefficient vector has length {found}, but the model expects {expected}.")]
    CoefficientLength { expected: usize, found: usize },
    #[error("Invalid basis selection: {0}")]
    InvalidBasis(String),
}

/// Read-only state handed to the per-point hooks of a fitted model.
pub struct FittedView<'a, K> {
    pub points: &'a PointStore,
    pub kernel: &'a K,
    pub alpha_beta: ArrayView1<'a, f64>,
}

/// The model-specific half of a score-matching estimator.
///
/// `build_system` is called with the kernel's right operand pointed at the
/// training data. The per-point hooks see the current test data and must be
/// pure functions of the view they receive.
pub trait ScoreMatchingModel<K: ScoreKernel>: Send + Sync {
    /// Length of the coefficient vector for `num_train` points in `dimension` dimensions.
    ///
    /// Models with per-dimension coefficients grow with `dimension`; kernel
    /// expansions over basis points ignore it.
    fn system_size(&self, num_train: usize, dimension: usize) -> usize;

    /// Checks model settings against the training data before anything is computed.
    #[inline]
    fn validate(&self, _: &PointStore) -> Result<(), EstimatorError> {
        Ok(())
    }

    fn build_system(&self, points: &PointStore, kernel: &K, lambda: f64) -> LinearSystem;

    /// Unnormalized log-density at test point `i`.
    fn log_pdf(&self, view: &FittedView<'_, K>, i: usize) -> f64;

    /// Gradient of the log-density at test point `i`.
    fn grad(&self, view: &FittedView<'_, K>, i: usize) -> Array1<f64>;

    /// Diagonal of the log-density Hessian at test point `i`.
    fn hessian_diag(&self, view: &FittedView<'_, K>, i: usize) -> Array1<f64>;
}

/// Diagnostics returned by [`KernelExpFamily::fit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    pub system_size: usize,
    pub spectrum: Spectrum,
    pub rank: usize,
}

pub struct KernelExpFamily<K, M> {
    points: PointStore,
    kernel: K,
    model: M,
    lambda: Regularization,
    alpha_beta: Option<Coefficients>,
}

impl<K, M> KernelExpFamily<K, M>
where
    K: ScoreKernel,
    M: ScoreMatchingModel<K>,
{
    /// Creates an unfitted estimator that owns `kernel` for its whole lifetime.
    pub fn new(
        data: Array2<f64>,
        mut kernel: K,
        model: M,
        lambda: f64,
    ) -> Result<Self, EstimatorError> {
        let lambda = Regularization::new(lambda).ok_or(EstimatorError::InvalidLambda(lambda))?;
        if data.ncols() == 0 {
            return Err(EstimatorError::EmptyTrainingData);
        }

        let points = PointStore::new(data);
        model.validate(&points)?;
        kernel.set_lhs(Arc::clone(points.train()))?;
        kernel.set_rhs(Arc::clone(points.train()))?;

        log::info!(
            "Problem size is N={}, D={}.",
            points.num_train(),
            points.dimension()
        );
        kernel.precompute();

        Ok(Self {
            points,
            kernel,
            model,
            lambda,
            alpha_beta: None,
        })
    }

    /// Rebuilds a fitted estimator from previously solved coefficients.
    pub fn from_coefficients(
        data: Array2<f64>,
        kernel: K,
        model: M,
        lambda: f64,
        alpha_beta: Array1<f64>,
    ) -> Result<Self, EstimatorError> {
        let mut estimator = Self::new(data, kernel, model, lambda)?;
        let expected = estimator.system_size();
        if alpha_beta.len() != expected {
            return Err(EstimatorError::CoefficientLength {
                expected,
                found: alpha_beta.len(),
            });
        }
        estimator.alpha_beta = Some(Coefficients::new(alpha_beta));
        Ok(estimator)
    }

    pub fn dimension(&self) -> usize {
        self.points.dimension()
    }

    pub fn num_train(&self) -> usize {
        self.points.num_train()
    }

    pub fn num_test(&self) -> usize {
        self.points.num_test()
    }

    pub fn lambda(&self) -> f64 {
        self.lambda.get()
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn points(&self) -> &PointStore {
        &self.points
    }

    pub fn train_point(&self, i: usize) -> ArrayView1<'_, f64> {
        self.points.train_point(i)
    }

    pub fn test_point(&self, i: usize) -> ArrayView1<'_, f64> {
        self.points.test_point(i)
    }

    pub fn is_test_equals_train(&self) -> bool {
        self.points.is_test_equals_train()
    }

    /// Declared coefficient length for the current training data.
    pub fn system_size(&self) -> usize {
        self.model.system_size(self.points.num_train(), self.points.dimension())
    }

    pub fn is_fitted(&self) -> bool {
        self.alpha_beta.is_some()
    }

    /// Coefficients of the last fit, if any.
    pub fn alpha_beta(&self) -> Option<&Array1<f64>> {
        self.alpha_beta.as_deref()
    }

    /// Replaces the test data and refreshes the kernel tables against it.
    ///
    /// On error nothing changes: the previous test data stays in place.
    pub fn set_test_data(&mut self, data: Array2<f64>) -> Result<(), EstimatorError> {
        self.set_shared_test_data(Arc::new(data))
    }

    /// Uses a single point as the test data.
    pub fn set_test_point(&mut self, point: Array1<f64>) -> Result<(), EstimatorError> {
        self.set_test_data(point.insert_axis(Axis(1)))
    }

    /// Restores train-as-test mode.
    pub fn reset_test_data(&mut self) -> Result<(), EstimatorError> {
        let train = Arc::clone(self.points.train());
        self.set_shared_test_data(train)
    }

    fn set_shared_test_data(&mut self, data: SharedPoints) -> Result<(), EstimatorError> {
        self.kernel.set_rhs(Arc::clone(&data))?;
        self.points.replace_test(data);
        self.kernel.precompute();
        Ok(())
    }

    /// Assembles and solves the score-matching system, replacing any previous fit.
    pub fn fit(&mut self) -> Result<FitSummary, EstimatorError> {
        let detached_test = if self.points.is_test_equals_train() {
            None
        } else {
            let test = Arc::clone(self.points.test());
            self.kernel.set_rhs(Arc::clone(self.points.train()))?;
            self.kernel.precompute();
            Some(test)
        };

        log::info!("Building system.");
        let system = self.model.build_system(&self.points, &self.kernel, self.lambda.get());

        if let Some(test) = detached_test {
            self.kernel.set_rhs(test)?;
            self.kernel.precompute();
        }

        let expected = self.system_size();
        if system.size() != expected {
            return Err(EstimatorError::SystemSizeMismatch {
                expected,
                found: system.size(),
            });
        }

        log::info!("Solving system of size {}.", system.size());
        let solution = solver::solve_svd(&system)?;
        self.alpha_beta = Some(Coefficients::new(solution.coefficients));

        Ok(FitSummary {
            system_size: expected,
            spectrum: solution.spectrum,
            rank: solution.rank,
        })
    }

    fn view(&self) -> Result<FittedView<'_, K>, EstimatorError> {
        let alpha_beta = self.alpha_beta.as_ref().ok_or(EstimatorError::NotFitted)?;
        Ok(FittedView {
            points: &self.points,
            kernel: &self.kernel,
            alpha_beta: alpha_beta.as_view(),
        })
    }

    fn assert_test_index(&self, i: usize) {
        assert!(
            i < self.points.num_test(),
            "test point index {i} out of range for {} points",
            self.points.num_test()
        );
    }

    /// Unnormalized log-density at test point `i`.
    ///
    /// # Panics
    /// If `i >= num_test()`.
    pub fn log_pdf_at(&self, i: usize) -> Result<f64, EstimatorError> {
        let view = self.view()?;
        self.assert_test_index(i);
        Ok(self.model.log_pdf(&view, i))
    }

    /// Gradient of the log-density at test point `i`.
    ///
    /// # Panics
    /// If `i >= num_test()`.
    pub fn grad_at(&self, i: usize) -> Result<Array1<f64>, EstimatorError> {
        let view = self.view()?;
        self.assert_test_index(i);
        Ok(self.model.grad(&view, i))
    }

    /// Hessian diagonal of the log-density at test point `i`.
    ///
    /// # Panics
    /// If `i >= num_test()`.
    pub fn hessian_diag_at(&self, i: usize) -> Result<Array1<f64>, EstimatorError> {
        let view = self.view()?;
        self.assert_test_index(i);
        Ok(self.model.hessian_diag(&view, i))
    }

    /// Log-density at every test point, in test-point order.
    pub fn log_pdf(&self) -> Result<Array1<f64>, EstimatorError> {
        let view = self.view()?;
        let model = &self.model;
        let values: Vec<f64> = (0..self.points.num_test())
            .into_par_iter()
            .map(|i| model.log_pdf(&view, i))
            .collect();
        Ok(Array1::from_vec(values))
    }

    /// Gradients as a `D x N_test` matrix; column `i` belongs to test point `i`.
    pub fn grad(&self) -> Result<Array2<f64>, EstimatorError> {
        let view = self.view()?;
        let model = &self.model;
        let mut result = Array2::<f64>::zeros((self.points.dimension(), self.points.num_test()));
        result
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut column)| column.assign(&model.grad(&view, i)));
        Ok(result)
    }

    /// Score-matching objective over the test data:
    /// the mean of `0.5 |grad_i|^2 + sum(hessian_diag_i)`.
    ///
    /// The per-point terms are summed by a parallel reduction, so the low-order
    /// bits may differ between thread counts.
    pub fn objective(&self) -> Result<f64, EstimatorError> {
        let view = self.view()?;
        let model = &self.model;
        let num_test = self.points.num_test();
        let total: f64 = (0..num_test)
            .into_par_iter()
            .map(|i| {
                let gradient = model.grad(&view, i);
                let hessian_diag = model.hessian_diag(&view, i);
                0.5 * gradient.dot(&gradient) + hessian_diag.sum()
            })
            .sum();
        Ok(total / num_test as f64)
    }
}
