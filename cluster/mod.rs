//! Feature clustering.
//!
//! Clustering is consumed through the [`FeatureClusterer`] capability: an
//! immutable configuration that, given a design matrix, returns an immutable
//! [`ClusterAssignment`]. Nothing is fitted in place, so one configuration can
//! be shared across threads and calls.

pub mod assignment;
pub mod connectivity;
pub mod ward;

pub use assignment::{ClusterAssignment, Pooling};
pub use connectivity::Connectivity;
pub use ward::WardAgglomeration;

use ndarray::ArrayView2;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("n_clusters must be between 1 and {n_features} (number of features), got {n_clusters}")]
    InvalidClusterCount { n_clusters: usize, n_features: usize },

    #[error(
        "Clustering produced {found} non-empty clusters but {expected} were requested; every cluster must own at least one feature"
    )]
    Degenerate { expected: usize, found: usize },

    #[error("Feature {feature} has label {label}, outside [0, {n_clusters})")]
    LabelOutOfRange {
        feature: usize,
        label: usize,
        n_clusters: usize,
    },

    #[error("Connectivity covers {graph_nodes} nodes but the design has {n_features} features")]
    ConnectivityMismatch {
        graph_nodes: usize,
        n_features: usize,
    },

    #[error(
        "Connectivity graph has too many components: merging stopped at {remaining} clusters, {requested} requested"
    )]
    DisconnectedGraph { remaining: usize, requested: usize },

    #[error("Edge ({a}, {b}) references a node outside [0, {n_nodes})")]
    InvalidEdge { a: usize, b: usize, n_nodes: usize },

    #[error("Expected a statistic of length {expected}, got {found}")]
    LengthMismatch { expected: usize, found: usize },
}

/// The minimal capability the inference pipeline needs from a feature
/// clustering algorithm.
pub trait FeatureClusterer {
    /// Number of clusters the configuration is set up to produce.
    fn n_clusters(&self) -> usize;

    /// Clusters the columns of `x` (`n_samples × n_features`).
    fn fit(&self, x: ArrayView2<f64>) -> Result<ClusterAssignment, ClusterError>;
}
