//! Penalized least-squares solvers used by the inference engines.
//!
//! Everything here works on precomputed Gram statistics (`XᵀX`, `XᵀY`,
//! `‖Y‖²`) so that the nodewise regressions and the cross-validated noise
//! fits can share a single pass over the design.

pub mod cv;
pub mod faer_ndarray;
pub mod lasso;

pub use cv::{CrossValidatedFit, CrossValidation};
pub use lasso::{CoordinateDescent, GramProblem, LassoFit};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error(
        "Coordinate descent did not converge within {max_iter} iterations (duality gap {dual_gap:.3e}, tolerance {tolerance:.3e})."
    )]
    DidNotConverge {
        max_iter: usize,
        dual_gap: f64,
        tolerance: f64,
    },

    #[error("Cross-validation needs between 2 and {n_samples} folds, got {n_folds}.")]
    InvalidFolds { n_folds: usize, n_samples: usize },

    #[error("Gram statistics are inconsistent: {0}")]
    Dimension(String),
}
