//! # Training and Test Point Storage
//!
//! Points are stored column-wise: a `D x N` matrix where every column is one
//! point and every row one input dimension. The training matrix (`lhs`) is
//! fixed for the lifetime of an estimator; the test matrix (`rhs`) can be
//! swapped any number of times.
//!
//! Both sides are shared behind an `Arc`, and "test equals train" is decided by
//! buffer identity rather than by comparing values. Two matrices with equal
//! entries but separate allocations are different test sets as far as kernel
//! caching is concerned.

use ndarray::{Array2, ArrayView1};
use std::sync::Arc;

/// A reference-counted `D x N` point matrix.
pub type SharedPoints = Arc<Array2<f64>>;

#[derive(Debug, Clone)]
pub struct PointStore {
    lhs: SharedPoints,
    rhs: SharedPoints,
}

impl PointStore {
    /// Creates a store in train-as-test mode.
    pub fn new(data: Array2<f64>) -> Self {
        let lhs = Arc::new(data);
        Self {
            rhs: Arc::clone(&lhs),
            lhs,
        }
    }

    /// Number of input dimensions `D`.
    pub fn dimension(&self) -> usize {
        self.lhs.nrows()
    }

    pub fn num_train(&self) -> usize {
        self.lhs.ncols()
    }

    pub fn num_test(&self) -> usize {
        self.rhs.ncols()
    }

    pub fn train(&self) -> &SharedPoints {
        &self.lhs
    }

    pub fn test(&self) -> &SharedPoints {
        &self.rhs
    }

    /// True iff the test matrix is the training buffer itself with the same shape.
    pub fn is_test_equals_train(&self) -> bool {
        self.lhs.as_ptr() == self.rhs.as_ptr()
            && self.lhs.nrows() == self.rhs.nrows()
            && self.lhs.ncols() == self.rhs.ncols()
    }

    /// Borrowed view of training point `i`.
    ///
    /// # Panics
    /// If `i >= num_train()`.
    pub fn train_point(&self, i: usize) -> ArrayView1<'_, f64> {
        assert!(
            i < self.num_train(),
            "training point index {i} out of range for {} points",
            self.num_train()
        );
        self.lhs.column(i)
    }

    /// Borrowed view of test point `i`.
    ///
    /// # Panics
    /// If `i >= num_test()`.
    pub fn test_point(&self, i: usize) -> ArrayView1<'_, f64> {
        assert!(
            i < self.num_test(),
            "test point index {i} out of range for {} points",
            self.num_test()
        );
        self.rhs.column(i)
    }

    pub(crate) fn replace_test(&mut self, rhs: SharedPoints) {
        self.rhs = rhs;
    }
}
