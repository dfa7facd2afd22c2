// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use crate::cluster::{ClusterAssignment, ClusterError, Pooling};
use crate::solver::faer_ndarray::FaerLinalgError;
use crate::solver::{CoordinateDescent, CrossValidation, SolverError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The inference procedure run on the cluster-reduced problem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    /// Desparsified lasso on a scalar outcome, normal test per cluster.
    #[default]
    DesparsifiedLasso,
    /// Desparsified multi-task lasso on a temporal outcome, chi-square test
    /// with one degree of freedom per time point.
    DesparsifiedGroupLasso,
}

impl Method {
    pub const ALL: [Method; 2] = [Method::DesparsifiedLasso, Method::DesparsifiedGroupLasso];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DesparsifiedLasso => "desparsified-lasso",
            Self::DesparsifiedGroupLasso => "desparsified-group-lasso",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| InferenceError::UnknownMethod(s.to_string()))
    }
}

impl TryFrom<String> for Method {
    type Error = InferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

/// Temporal structure imposed on the noise covariance by `group_reid`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseModel {
    /// Stationary autoregressive correlation fitted by Yule–Walker.
    #[default]
    Ar,
    /// The empirical residual covariance, unstructured.
    Empirical,
}

/// The outcome: one column per sample for scalar problems, one column per
/// time point for temporal ones.
#[derive(Clone, Copy, Debug)]
pub enum Response<'a> {
    Scalar(ArrayView1<'a, f64>),
    Temporal(ArrayView2<'a, f64>),
}

impl Response<'_> {
    pub fn n_samples(&self) -> usize {
        match self {
            Response::Scalar(y) => y.len(),
            Response::Temporal(y) => y.nrows(),
        }
    }

    pub fn n_times(&self) -> usize {
        match self {
            Response::Scalar(_) => 1,
            Response::Temporal(y) => y.ncols(),
        }
    }

    /// The outcome as an `n_samples × n_times` matrix.
    pub fn to_matrix(&self) -> Array2<f64> {
        match self {
            Response::Scalar(y) => y.to_owned().insert_axis(ndarray::Axis(1)),
            Response::Temporal(y) => y.to_owned(),
        }
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error(
        "Unknow method '{0}'. Supported methods are 'desparsified-lasso' and 'desparsified-group-lasso'."
    )]
    UnknownMethod(String),

    #[error("Shape mismatch for {what}: expected {expected}, found {found}.")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(
        "Variance estimate for cluster {index} is not positive ({value:.3e}); the reduced problem is numerically unstable."
    )]
    NonPositiveVariance { index: usize, value: f64 },

    #[error("Non-finite {what} for cluster {index}.")]
    NonFiniteStatistic { what: &'static str, index: usize },

    #[error("Group-robust variance needs at least two groups, found {0}.")]
    InsufficientGroups(usize),

    #[error("Clustering failed: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Lasso solver failed: {0}")]
    Solver(#[from] SolverError),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}

/// Settings shared by both inference engines.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineOptions {
    /// Nodewise penalty as a fraction of the largest off-diagonal Gram entry.
    pub nodewise_c: f64,
    pub nodewise_solver: CoordinateDescent,
    /// Cross-validated lasso used for the noise level.
    pub noise_cv: CrossValidation,
    pub noise_model: NoiseModel,
    pub ar_order: usize,
    /// Rescale by `n / (n - support)` to account for the lasso degrees of freedom.
    pub dof_adjustment: bool,
    /// Level of the confidence bounds reported by the scalar engine.
    pub confidence: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            nodewise_c: 0.01,
            nodewise_solver: CoordinateDescent::default(),
            noise_cv: CrossValidation::default(),
            noise_model: NoiseModel::Ar,
            ar_order: 1,
            dof_adjustment: false,
            confidence: 0.95,
        }
    }
}

/// Settings for one clustered-inference run.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceOptions {
    /// Fraction of samples (or of groups) the clustering is fitted on.
    pub train_size: f64,
    pub seed: u64,
    pub pooling: Pooling,
    pub engine: EngineOptions,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            train_size: 1.0,
            seed: 0,
            pooling: Pooling::Mean,
            engine: EngineOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfidenceBounds {
    pub level: f64,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

/// Per-cluster output of an inference engine. Every vector has length
/// `n_clusters`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterStatistics {
    pub beta_hat: Array1<f64>,
    /// `n_clusters × n_times` estimate of the temporal engine.
    pub beta_hat_temporal: Option<Array2<f64>>,
    pub confidence: Option<ConfidenceBounds>,
    pub pval: Array1<f64>,
    pub pval_corr: Array1<f64>,
    pub one_minus_pval: Array1<f64>,
    pub one_minus_pval_corr: Array1<f64>,
}

/// Feature-level result of clustered inference. Every vector has length
/// `n_features`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusteredInferenceResult {
    pub beta_hat: Array1<f64>,
    pub pval: Array1<f64>,
    pub pval_corr: Array1<f64>,
    pub one_minus_pval: Array1<f64>,
    pub one_minus_pval_corr: Array1<f64>,
    pub beta_hat_temporal: Option<Array2<f64>>,
    pub confidence: Option<ConfidenceBounds>,
    pub assignment: ClusterAssignment,
}

impl ClusteredInferenceResult {
    pub fn n_features(&self) -> usize {
        self.beta_hat.len()
    }

    /// The five statistic vectors in their conventional order.
    pub fn into_tuple(
        self,
    ) -> (
        Array1<f64>,
        Array1<f64>,
        Array1<f64>,
        Array1<f64>,
        Array1<f64>,
    ) {
        (
            self.beta_hat,
            self.pval,
            self.pval_corr,
            self.one_minus_pval,
            self.one_minus_pval_corr,
        )
    }
}
