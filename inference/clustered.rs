//! Clustered inference: cluster the features, run a desparsified engine on
//! the cluster-reduced problem, and map the cluster-level evidence back to
//! every feature.

use crate::cluster::{ClusterAssignment, ClusterError, FeatureClusterer};
use crate::desparsified::{desparsified_lasso, group_index};
use crate::group::desparsified_group_lasso;
use crate::progress::{InferenceProgressObserver, InferenceStage, NoopInferenceProgress};
use crate::types::{
    ClusterStatistics, ClusteredInferenceResult, ConfidenceBounds, InferenceError,
    InferenceOptions, Method, Response,
};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// A validated clustered-inference configuration. The method string is
/// checked on construction, before any numerical work.
pub struct ClusteredInference<'c, C: FeatureClusterer + ?Sized> {
    clusterer: &'c C,
    n_clusters: usize,
    method: Method,
    options: InferenceOptions,
}

impl<'c, C: FeatureClusterer + ?Sized> ClusteredInference<'c, C> {
    pub fn new(clusterer: &'c C, n_clusters: usize, method: &str) -> Result<Self, InferenceError> {
        let method: Method = method.parse()?;
        Ok(Self::with_method(clusterer, n_clusters, method))
    }

    pub fn with_method(clusterer: &'c C, n_clusters: usize, method: Method) -> Self {
        Self {
            clusterer,
            n_clusters,
            method,
            options: InferenceOptions::default(),
        }
    }

    pub fn options(mut self, options: InferenceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn run(
        &self,
        x: ArrayView2<f64>,
        y: Response<'_>,
        groups: Option<&[i64]>,
    ) -> Result<ClusteredInferenceResult, InferenceError> {
        self.run_with_progress(x, y, groups, &mut NoopInferenceProgress)
    }

    pub fn run_with_progress(
        &self,
        x: ArrayView2<f64>,
        y: Response<'_>,
        groups: Option<&[i64]>,
        progress: &mut dyn InferenceProgressObserver,
    ) -> Result<ClusteredInferenceResult, InferenceError> {
        self.validate(x, &y, groups)?;
        let (n_samples, n_features) = x.dim();
        log::info!(
            "Clustered inference ({}) on {} samples, {} features, {} clusters",
            self.method,
            n_samples,
            n_features,
            self.n_clusters
        );

        progress.on_stage_start(InferenceStage::Clustering, 1);
        let rows = subsample_rows(n_samples, self.options.train_size, self.options.seed, groups)?;
        let assignment = if rows.len() == n_samples {
            self.clusterer.fit(x)?
        } else {
            log::debug!("Fitting the clustering on {} of {} samples", rows.len(), n_samples);
            self.clusterer.fit(x.select(Axis(0), &rows).view())?
        };
        if assignment.n_clusters() != self.n_clusters {
            return Err(InferenceError::Cluster(ClusterError::Degenerate {
                expected: self.n_clusters,
                found: assignment.n_clusters(),
            }));
        }
        progress.on_stage_finish(InferenceStage::Clustering);

        progress.on_stage_start(InferenceStage::Reduction, 1);
        let reduced = standardize_columns(assignment.reduce_with(x, self.options.pooling)?);
        progress.on_stage_finish(InferenceStage::Reduction);

        progress.on_stage_start(InferenceStage::Inference, 1);
        let statistics = match self.method {
            Method::DesparsifiedLasso => {
                let y = center_columns(y.to_matrix());
                desparsified_lasso(reduced.view(), y.column(0), groups, &self.options.engine)?
            }
            Method::DesparsifiedGroupLasso => {
                if groups.is_some() {
                    log::debug!("The temporal engine does not use sample groups beyond subsampling");
                }
                let y = center_columns(y.to_matrix());
                desparsified_group_lasso(reduced.view(), y.view(), &self.options.engine)?
            }
        };
        progress.on_stage_finish(InferenceStage::Inference);

        progress.on_stage_start(InferenceStage::InverseMapping, 1);
        let result = inverse_map(statistics, assignment)?;
        progress.on_stage_finish(InferenceStage::InverseMapping);
        Ok(result)
    }

    fn validate(
        &self,
        x: ArrayView2<f64>,
        y: &Response<'_>,
        groups: Option<&[i64]>,
    ) -> Result<(), InferenceError> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(InferenceError::InvalidParameter(format!(
                "design matrix is empty ({n_samples} x {n_features})"
            )));
        }
        if self.n_clusters != self.clusterer.n_clusters() {
            return Err(InferenceError::InvalidParameter(format!(
                "n_clusters is {} but the clusterer is configured for {}",
                self.n_clusters,
                self.clusterer.n_clusters()
            )));
        }
        if y.n_samples() != n_samples {
            return Err(InferenceError::ShapeMismatch {
                what: "outcome samples",
                expected: n_samples,
                found: y.n_samples(),
            });
        }
        if self.method == Method::DesparsifiedLasso && y.n_times() != 1 {
            return Err(InferenceError::ShapeMismatch {
                what: "outcome columns for desparsified-lasso",
                expected: 1,
                found: y.n_times(),
            });
        }
        if let Some(labels) = groups {
            if labels.len() != n_samples {
                return Err(InferenceError::ShapeMismatch {
                    what: "groups length",
                    expected: n_samples,
                    found: labels.len(),
                });
            }
        }
        let train_size = self.options.train_size;
        if !(train_size > 0.0 && train_size <= 1.0) {
            return Err(InferenceError::InvalidParameter(format!(
                "train_size must lie in (0, 1], got {train_size}"
            )));
        }
        Ok(())
    }
}

/// Runs one clustered inference with the given method name.
pub fn clustered_inference<C: FeatureClusterer + ?Sized>(
    x: ArrayView2<f64>,
    y: Response<'_>,
    clusterer: &C,
    n_clusters: usize,
    method: &str,
    groups: Option<&[i64]>,
    options: &InferenceOptions,
) -> Result<ClusteredInferenceResult, InferenceError> {
    ClusteredInference::new(clusterer, n_clusters, method)?
        .options(options.clone())
        .run(x, y, groups)
}

/// Rows the clustering is fitted on, in increasing order.
///
/// With `train_size == 1` every row is used. Otherwise a seeded draw picks
/// `round(train_size · n)` rows, or, with groups, `round(train_size · G)`
/// whole groups so that repeated measures stay together.
pub fn subsample_rows(
    n_samples: usize,
    train_size: f64,
    seed: u64,
    groups: Option<&[i64]>,
) -> Result<Vec<usize>, InferenceError> {
    if train_size >= 1.0 {
        return Ok((0..n_samples).collect());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let rows: Vec<usize> = match groups {
        Some(labels) => {
            let (index, n_groups) = group_index(labels);
            let n_drawn = ((train_size * n_groups as f64).round() as usize).clamp(1, n_groups);
            let mut chosen = vec![false; n_groups];
            for g in sample(&mut rng, n_groups, n_drawn).into_iter() {
                chosen[g] = true;
            }
            (0..n_samples).filter(|&i| chosen[index[i]]).collect()
        }
        None => {
            let n_drawn = ((train_size * n_samples as f64).round() as usize).clamp(1, n_samples);
            let mut drawn = sample(&mut rng, n_samples, n_drawn).into_vec();
            drawn.sort_unstable();
            drawn
        }
    };
    if rows.len() < 2 {
        return Err(InferenceError::InvalidParameter(format!(
            "train_size {train_size} leaves {} samples for the clustering",
            rows.len()
        )));
    }
    Ok(rows)
}

/// Centers each column and scales it to unit population variance. Constant
/// columns are only centered.
pub fn standardize_columns(mut x: Array2<f64>) -> Array2<f64> {
    for mut column in x.axis_iter_mut(Axis(1)) {
        let mean = column.mean().unwrap_or(0.0);
        column.mapv_inplace(|v| v - mean);
        let std = (column.dot(&column) / column.len().max(1) as f64).sqrt();
        if std > 0.0 {
            column.mapv_inplace(|v| v / std);
        }
    }
    x
}

pub fn center_columns(mut y: Array2<f64>) -> Array2<f64> {
    for mut column in y.axis_iter_mut(Axis(1)) {
        let mean = column.mean().unwrap_or(0.0);
        column.mapv_inplace(|v| v - mean);
    }
    y
}

/// Broadcasts cluster-level statistics to features. Estimates are divided
/// by the size of their cluster; p-values are copied unchanged.
pub fn inverse_map(
    statistics: ClusterStatistics,
    assignment: ClusterAssignment,
) -> Result<ClusteredInferenceResult, InferenceError> {
    let broadcast = |values: &Array1<f64>| assignment.inverse(values.view());
    let pval = broadcast(&statistics.pval)?;
    let pval_corr = broadcast(&statistics.pval_corr)?;
    let one_minus_pval = broadcast(&statistics.one_minus_pval)?;
    let one_minus_pval_corr = broadcast(&statistics.one_minus_pval_corr)?;
    let beta_hat = assignment.inverse_scaled(statistics.beta_hat.view())?;
    let beta_hat_temporal = statistics
        .beta_hat_temporal
        .map(|temporal| assignment.inverse_scaled_rows(temporal.view()))
        .transpose()?;
    let confidence = statistics
        .confidence
        .map(|bounds| -> Result<ConfidenceBounds, InferenceError> {
            Ok(ConfidenceBounds {
                level: bounds.level,
                lower: assignment.inverse_scaled(bounds.lower.view())?,
                upper: assignment.inverse_scaled(bounds.upper.view())?,
            })
        })
        .transpose()?;

    Ok(ClusteredInferenceResult {
        beta_hat,
        pval,
        pval_corr,
        one_minus_pval,
        one_minus_pval_corr,
        beta_hat_temporal,
        confidence,
        assignment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Connectivity, WardAgglomeration};
    use crate::progress::recording::RecordingProgress;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::Rng;
    use rand_distr::StandardNormal;

    /// Clusterer returning a fixed partition, for exercising the orchestration
    /// without depending on Ward's merge order.
    struct FixedLabels {
        labels: Vec<usize>,
        n_clusters: usize,
    }

    impl FeatureClusterer for FixedLabels {
        fn n_clusters(&self) -> usize {
            self.n_clusters
        }

        fn fit(&self, _: ArrayView2<f64>) -> Result<ClusterAssignment, ClusterError> {
            ClusterAssignment::from_labels(self.labels.clone(), self.n_clusters)
        }
    }

    fn blocky_problem(seed: u64) -> (Array2<f64>, Array1<f64>) {
        // 40 features in 10 blocks of 4 strongly correlated features; block 0 is active.
        let mut rng = StdRng::seed_from_u64(seed);
        let n = 100;
        let latent = Array2::from_shape_fn((n, 10), |_| rng.sample::<f64, _>(StandardNormal));
        let x = Array2::from_shape_fn((n, 40), |(i, j)| {
            latent[[i, j / 4]] + 0.1 * rng.sample::<f64, _>(StandardNormal)
        });
        let y = Array1::from_shape_fn(n, |i| 2.0 * latent[[i, 0]] + rng.sample::<f64, _>(StandardNormal));
        (x, y)
    }

    fn block_labels() -> FixedLabels {
        FixedLabels {
            labels: (0..40).map(|j| j / 4).collect(),
            n_clusters: 10,
        }
    }

    #[test]
    fn unknown_method_fails_before_any_work() {
        let clusterer = block_labels();
        let err = ClusteredInference::new(&clusterer, 10, "test").err().unwrap();
        assert!(err.to_string().contains("Unknow method"));
    }

    #[test]
    fn outputs_have_feature_length() {
        let (x, y) = blocky_problem(4);
        let clusterer = block_labels();
        let result = ClusteredInference::new(&clusterer, 10, "desparsified-lasso")
            .unwrap()
            .run(x.view(), Response::Scalar(y.view()), None)
            .unwrap();
        assert_eq!(result.n_features(), 40);
        assert_eq!(result.pval.len(), 40);
        assert_eq!(result.pval_corr.len(), 40);
        assert_eq!(result.one_minus_pval_corr.len(), 40);
        for j in 0..4 {
            assert!(result.pval_corr[j] < 1e-3);
        }
        for j in 0..40 {
            assert_abs_diff_eq!(result.pval[j] + result.one_minus_pval[j], 1.0, epsilon = 1e-12);
            assert_eq!(result.pval[j], result.pval[(j / 4) * 4]);
            // beta_hat is divided by the cluster size
            assert_abs_diff_eq!(result.beta_hat[j], result.beta_hat[(j / 4) * 4], epsilon = 1e-15);
        }
    }

    #[test]
    fn clusterer_count_must_match() {
        let (x, y) = blocky_problem(1);
        let clusterer = block_labels();
        let err = ClusteredInference::new(&clusterer, 12, "desparsified-lasso")
            .unwrap()
            .run(x.view(), Response::Scalar(y.view()), None)
            .unwrap_err();
        assert!(matches!(err, InferenceError::InvalidParameter(_)));
    }

    #[test]
    fn degenerate_clustering_is_fatal() {
        let (x, y) = blocky_problem(1);
        let clusterer = FixedLabels {
            labels: (0..40).map(|j| if j < 20 { 0 } else { 2 }).collect(),
            n_clusters: 3,
        };
        let err = ClusteredInference::new(&clusterer, 3, "desparsified-lasso")
            .unwrap()
            .run(x.view(), Response::Scalar(y.view()), None)
            .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Cluster(ClusterError::Degenerate { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn sample_mismatch_is_rejected() {
        let (x, _) = blocky_problem(1);
        let y = Array1::<f64>::zeros(7);
        let clusterer = block_labels();
        let err = ClusteredInference::new(&clusterer, 10, "desparsified-lasso")
            .unwrap()
            .run(x.view(), Response::Scalar(y.view()), None)
            .unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { expected: 100, found: 7, .. }));

        let (x, y) = blocky_problem(1);
        let groups = vec![0_i64; 3];
        let err = ClusteredInference::new(&clusterer, 10, "desparsified-lasso")
            .unwrap()
            .run(x.view(), Response::Scalar(y.view()), Some(&groups))
            .unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { what: "groups length", .. }));
    }

    #[test]
    fn scalar_method_rejects_multicolumn_outcome() {
        let (x, _) = blocky_problem(1);
        let y = Array2::<f64>::zeros((100, 3));
        let clusterer = block_labels();
        let err = ClusteredInference::new(&clusterer, 10, "desparsified-lasso")
            .unwrap()
            .run(x.view(), Response::Temporal(y.view()), None)
            .unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { expected: 1, found: 3, .. }));
    }

    #[test]
    fn progress_reports_every_stage() {
        let (x, y) = blocky_problem(6);
        let ward = WardAgglomeration::new(10).with_connectivity(Connectivity::grid(40, 1, 1));
        let mut progress = RecordingProgress::default();
        ClusteredInference::new(&ward, 10, "desparsified-lasso")
            .unwrap()
            .run_with_progress(x.view(), Response::Scalar(y.view()), None, &mut progress)
            .unwrap();
        let finished: Vec<InferenceStage> = progress
            .events
            .iter()
            .filter(|(_, kind, _)| *kind == "finish")
            .map(|(stage, _, _)| *stage)
            .collect();
        assert_eq!(
            finished,
            vec![
                InferenceStage::Clustering,
                InferenceStage::Reduction,
                InferenceStage::Inference,
                InferenceStage::InverseMapping
            ]
        );
    }

    #[test]
    fn subsampling_keeps_whole_groups() {
        let groups: Vec<i64> = (0..40).map(|i| i / 4).collect();
        let rows = subsample_rows(40, 0.5, 3, Some(&groups)).unwrap();
        assert_eq!(rows.len(), 20);
        for chunk in rows.chunks(4) {
            let g = groups[chunk[0]];
            assert!(chunk.iter().all(|&i| groups[i] == g));
        }
        assert_eq!(rows, subsample_rows(40, 0.5, 3, Some(&groups)).unwrap());
    }

    #[test]
    fn subsampling_without_groups_is_sorted_and_seeded() {
        let rows = subsample_rows(50, 0.3, 11, None).unwrap();
        assert_eq!(rows.len(), 15);
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(rows, subsample_rows(50, 0.3, 11, None).unwrap());
        assert_eq!(subsample_rows(5, 1.0, 0, None).unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn standardization_gives_unit_variance() {
        let x = array![[1.0, 5.0], [3.0, 5.0], [5.0, 5.0]];
        let z = standardize_columns(x);
        assert_abs_diff_eq!(z.column(0).sum(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z.column(0).dot(&z.column(0)) / 3.0, 1.0, epsilon = 1e-12);
        assert!(z.column(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn inverse_map_divides_estimates_only() {
        let assignment = ClusterAssignment::from_labels(vec![0, 0, 1], 2).unwrap();
        let statistics = ClusterStatistics {
            beta_hat: array![4.0, 1.0],
            beta_hat_temporal: None,
            confidence: None,
            pval: array![0.01, 0.5],
            pval_corr: array![0.02, 0.5],
            one_minus_pval: array![0.99, 0.5],
            one_minus_pval_corr: array![0.98, 0.5],
        };
        let result = inverse_map(statistics, assignment).unwrap();
        assert_eq!(result.beta_hat.to_vec(), vec![2.0, 2.0, 1.0]);
        assert_eq!(result.pval.to_vec(), vec![0.01, 0.01, 0.5]);
        assert_eq!(result.one_minus_pval_corr.to_vec(), vec![0.98, 0.98, 0.5]);
    }
}
