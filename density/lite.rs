//! # Lite Score-Matching Model
//!
//! The log-density is a kernel expansion over a set of basis points `z_j`:
//!
//! `f(y) = sum_j alpha_j k(z_j, y)`
//!
//! The basis is either every training point or a Nyström subset of them.
//! Minimizing the empirical score-matching objective plus `lambda/2 |alpha|^2`
//! gives the linear system
//!
//! `(C + lambda I) alpha = -b`
//!
//! with `C = (1/N) sum_{a,d} g_ad g_ad^T`, `b = (1/N) sum_{a,d} h_ad`, where
//! `g_ad[j]` and `h_ad[j]` are the first and second derivatives of
//! `k(z_j, .)` along dimension `d` at training point `x_a`.

use crate::data::PointStore;
use crate::estimator::{EstimatorError, FittedView, ScoreMatchingModel};
use crate::kernel::ScoreKernel;
use crate::solver::LinearSystem;
use ndarray::{Array1, Array2, Zip, s};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiteModel {
    basis: Option<Vec<usize>>,
}

impl LiteModel {
    /// Uses every training point as a basis point.
    pub fn full() -> Self {
        Self { basis: None }
    }

    /// Uses only the training points at `indices` as basis points.
    pub fn nystrom(indices: Vec<usize>) -> Self {
        Self {
            basis: Some(indices),
        }
    }

    /// The Nyström indices, or `None` when the full training set is the basis.
    pub fn basis_indices(&self) -> Option<&[usize]> {
        self.basis.as_deref()
    }

    #[inline]
    fn basis_point(&self, j: usize) -> usize {
        match &self.basis {
            Some(indices) => indices[j],
            None => j,
        }
    }

    fn basis_len(&self, num_train: usize) -> usize {
        self.basis.as_ref().map_or(num_train, Vec::len)
    }
}

impl<K: ScoreKernel> ScoreMatchingModel<K> for LiteModel {
    fn system_size(&self, num_train: usize, _: usize) -> usize {
        self.basis_len(num_train)
    }

    fn validate(&self, points: &PointStore) -> Result<(), EstimatorError> {
        let Some(indices) = &self.basis else {
            return Ok(());
        };
        if indices.is_empty() {
            return Err(EstimatorError::InvalidBasis(
                "Nyström basis must contain at least one point".to_string(),
            ));
        }
        let num_train = points.num_train();
        if let Some(&bad) = indices.iter().find(|&&idx| idx >= num_train) {
            return Err(EstimatorError::InvalidBasis(format!(
                "basis index {bad} is out of range for {num_train} training points"
            )));
        }
        let unique: HashSet<usize> = indices.iter().copied().collect();
        if unique.len() != indices.len() {
            return Err(EstimatorError::InvalidBasis(
                "Nyström basis indices must be unique".to_string(),
            ));
        }
        Ok(())
    }

    fn build_system(&self, points: &PointStore, kernel: &K, lambda: f64) -> LinearSystem {
        let num_train = points.num_train();
        let dimension = points.dimension();
        let basis_len = self.basis_len(num_train);

        // Row j holds d/dy_d k(z_j, x_a) for every (a, d), laid out point-major.
        let mut gradients = Array2::<f64>::zeros((basis_len, num_train * dimension));
        let mut curvature = Array1::<f64>::zeros(basis_len);

        Zip::indexed(gradients.rows_mut())
            .and(&mut curvature)
            .par_for_each(|j, mut row, total| {
                let z = self.basis_point(j);
                for a in 0..num_train {
                    row.slice_mut(s![a * dimension..(a + 1) * dimension])
                        .assign(&kernel.grad_rhs(z, a));
                    *total += kernel.hessian_diag_rhs(z, a).sum();
                }
            });

        let scale = 1.0 / num_train as f64;
        let mut matrix = gradients.dot(&gradients.t()) * scale;
        matrix.diag_mut().mapv_inplace(|v| v + lambda);
        let rhs = curvature * (-scale);

        LinearSystem::new(matrix, rhs)
    }

    fn log_pdf(&self, view: &FittedView<'_, K>, i: usize) -> f64 {
        view.alpha_beta
            .iter()
            .enumerate()
            .map(|(j, &alpha)| alpha * view.kernel.value(self.basis_point(j), i))
            .sum()
    }

    fn grad(&self, view: &FittedView<'_, K>, i: usize) -> Array1<f64> {
        let mut total = Array1::<f64>::zeros(view.points.dimension());
        for (j, &alpha) in view.alpha_beta.iter().enumerate() {
            total.scaled_add(alpha, &view.kernel.grad_rhs(self.basis_point(j), i));
        }
        total
    }

    fn hessian_diag(&self, view: &FittedView<'_, K>, i: usize) -> Array1<f64> {
        let mut total = Array1::<f64>::zeros(view.points.dimension());
        for (j, &alpha) in view.alpha_beta.iter().enumerate() {
            total.scaled_add(alpha, &view.kernel.hessian_diag_rhs(self.basis_point(j), i));
        }
        total
    }
}
