use crate::estimator::{EstimatorError, KernelExpFamily};
use crate::kernel::{GaussianKernel, KernelError};
use crate::lite::LiteModel;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable format of a fitted density model
// when serialized to a TOML file.

/// Kernel family and its bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KernelConfig {
    /// `k(x, y) = exp(-|x - y|^2 / sigma)`.
    Gaussian { sigma: f64 },
}

/// Which training points serve as basis points of the kernel expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BasisConfig {
    /// Every training point; the system size equals the number of training points.
    Full,
    /// A subset of training points given by column index.
    Nystrom { indices: Vec<usize> },
}

/// Everything needed to construct an estimator besides the data itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub kernel: KernelConfig,
    pub lambda: f64,
    pub basis: BasisConfig,
}

/// The estimator type every configuration builds.
pub type GaussianLiteEstimator = KernelExpFamily<GaussianKernel, LiteModel>;

/// A fitted model: configuration, training points and solved coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub config: EstimatorConfig,
    /// Training points, one column per point.
    pub training_points: Array2<f64>,
    pub alpha_beta: Array1<f64>,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid kernel configuration: {0}")]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
}

impl KernelConfig {
    pub fn build(&self) -> Result<GaussianKernel, KernelError> {
        match *self {
            KernelConfig::Gaussian { sigma } => GaussianKernel::new(sigma),
        }
    }
}

impl BasisConfig {
    pub fn build(&self) -> LiteModel {
        match self {
            BasisConfig::Full => LiteModel::full(),
            BasisConfig::Nystrom { indices } => LiteModel::nystrom(indices.clone()),
        }
    }
}

impl EstimatorConfig {
    /// Creates an unfitted estimator on `data` (`D x N`).
    pub fn build(&self, data: Array2<f64>) -> Result<GaussianLiteEstimator, ModelError> {
        let kernel = self.kernel.build()?;
        let estimator = KernelExpFamily::new(data, kernel, self.basis.build(), self.lambda)?;
        Ok(estimator)
    }
}

impl FittedModel {
    /// Captures a fitted estimator together with the configuration that built it.
    pub fn from_estimator(
        config: EstimatorConfig,
        estimator: &GaussianLiteEstimator,
    ) -> Result<Self, ModelError> {
        let alpha_beta = estimator
            .alpha_beta()
            .ok_or(EstimatorError::NotFitted)?
            .clone();
        Ok(Self {
            config,
            training_points: Array2::clone(estimator.points().train()),
            alpha_beta,
        })
    }

    /// Rebuilds a fitted estimator without solving the system again.
    pub fn into_estimator(self) -> Result<GaussianLiteEstimator, ModelError> {
        let kernel = self.config.kernel.build()?;
        let estimator = KernelExpFamily::from_coefficients(
            self.training_points,
            kernel,
            self.config.basis.build(),
            self.config.lambda,
            self.alpha_beta,
        )?;
        Ok(estimator)
    }

    /// Saves the model to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a model from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn config(basis: BasisConfig) -> EstimatorConfig {
        EstimatorConfig {
            kernel: KernelConfig::Gaussian { sigma: 1.5 },
            lambda: 0.05,
            basis,
        }
    }

    fn training_data() -> Array2<f64> {
        array![
            [0.0, 0.8, -0.6, 1.2, -1.1],
            [0.1, -0.4, 0.9, 0.3, -0.7]
        ]
    }

    #[test]
    fn unfitted_estimator_cannot_be_captured() {
        let cfg = config(BasisConfig::Full);
        let estimator = cfg.build(training_data()).unwrap();
        let err = FittedModel::from_estimator(cfg, &estimator).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Estimator(EstimatorError::NotFitted)
        ));
    }

    #[test]
    fn invalid_bandwidth_is_reported() {
        let cfg = EstimatorConfig {
            kernel: KernelConfig::Gaussian { sigma: -2.0 },
            lambda: 0.1,
            basis: BasisConfig::Full,
        };
        assert!(matches!(
            cfg.build(training_data()),
            Err(ModelError::Kernel(KernelError::InvalidBandwidth(_)))
        ));
    }

    #[test]
    fn saved_model_reproduces_density() {
        let cfg = config(BasisConfig::Nystrom {
            indices: vec![0, 2, 4],
        });
        let mut estimator = cfg.build(training_data()).unwrap();
        estimator.fit().unwrap();
        let expected = estimator.log_pdf().unwrap();

        let model = FittedModel::from_estimator(cfg.clone(), &estimator).unwrap();
        let file = NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();

        let loaded = FittedModel::load(file.path()).unwrap();
        assert_eq!(loaded.config, cfg);
        assert_eq!(loaded.alpha_beta.len(), 3);

        let restored = loaded.into_estimator().unwrap();
        assert!(restored.is_fitted());
        let actual = restored.log_pdf().unwrap();
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn coefficient_length_is_checked_on_restore() {
        let model = FittedModel {
            config: config(BasisConfig::Full),
            training_points: training_data(),
            alpha_beta: Array1::zeros(3),
        };
        assert!(matches!(
            model.into_estimator(),
            Err(ModelError::Estimator(EstimatorError::CoefficientLength {
                expected: 5,
                found: 3
            }))
        ));
    }
}
