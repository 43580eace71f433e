use ndarray::{Array1, ArrayView1};
use std::ops::Deref;

/// Solved coefficient vector `alpha_beta` of a kernel exponential family fit.
///
/// Only the estimator creates one, and every `fit()` replaces it wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct Coefficients(Array1<f64>);

impl Coefficients {
    pub(crate) fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.0
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Ridge weight `lambda` added to the diagonal of the score-matching system.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Regularization(f64);

impl Regularization {
    /// Returns `None` unless `value` is finite and strictly positive.
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}
