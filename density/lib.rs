#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod data;
pub mod estimator;
pub mod io;
pub mod kernel;
pub mod lite;
pub mod model;
pub mod solver;
pub mod types;

pub use data::{PointStore, SharedPoints};
pub use estimator::{EstimatorError, FitSummary, FittedView, KernelExpFamily, ScoreMatchingModel};
pub use io::{DataError, load_points};
pub use kernel::{GaussianKernel, Kernel, KernelError, ScoreKernel};
pub use lite::LiteModel;
pub use model::{
    BasisConfig, EstimatorConfig, FittedModel, GaussianLiteEstimator, KernelConfig, ModelError,
};
pub use solver::{LinearSystem, SolverError, Spectrum};
pub use types::{Coefficients, Regularization};
