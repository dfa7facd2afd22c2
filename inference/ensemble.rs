//! Ensemble of clustered inferences.
//!
//! A single clustering is one arbitrary cut of strongly correlated features.
//! The ensemble refits the clustering on `n_bootstraps` seeded subsamples,
//! runs clustered inference for each, averages the feature-level estimates
//! and aggregates the one-sided p-values by quantile aggregation.

use crate::clustered::ClusteredInference;
use crate::cluster::FeatureClusterer;
use crate::progress::{InferenceProgressObserver, InferenceStage, NoopInferenceProgress};
use crate::pvalue::{Aggregation, aggregate, corrected_pair};
use crate::types::{ClusteredInferenceResult, InferenceError, InferenceOptions, Method, Response};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleOptions {
    pub n_bootstraps: usize,
    /// Subsample fraction each bootstrap clustering is fitted on.
    pub train_size: f64,
    pub aggregation: Aggregation,
    /// Per-run settings; bootstrap `b` uses seed `inference.seed + b`.
    pub inference: InferenceOptions,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        Self {
            n_bootstraps: 25,
            train_size: 0.3,
            aggregation: Aggregation::Quantile { gamma: 0.5 },
            inference: InferenceOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleResult {
    pub beta_hat: Array1<f64>,
    pub pval: Array1<f64>,
    pub pval_corr: Array1<f64>,
    pub one_minus_pval: Array1<f64>,
    pub one_minus_pval_corr: Array1<f64>,
    pub n_bootstraps: usize,
}

fn stack(rows: &[&Array1<f64>]) -> Array2<f64> {
    let n_cols = rows.first().map_or(0, |row| row.len());
    let mut stacked = Array2::<f64>::zeros((rows.len(), n_cols));
    for (mut target, row) in stacked.rows_mut().into_iter().zip(rows) {
        target.assign(row);
    }
    stacked
}

pub fn ensemble_clustered_inference<C: FeatureClusterer + Sync + ?Sized>(
    x: ArrayView2<f64>,
    y: Response<'_>,
    clusterer: &C,
    n_clusters: usize,
    method: &str,
    groups: Option<&[i64]>,
    options: &EnsembleOptions,
) -> Result<EnsembleResult, InferenceError> {
    let method: Method = method.parse()?;
    ensemble_with_progress(
        x,
        y,
        clusterer,
        n_clusters,
        method,
        groups,
        options,
        &mut NoopInferenceProgress,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn ensemble_with_progress<C: FeatureClusterer + Sync + ?Sized>(
    x: ArrayView2<f64>,
    y: Response<'_>,
    clusterer: &C,
    n_clusters: usize,
    method: Method,
    groups: Option<&[i64]>,
    options: &EnsembleOptions,
    progress: &mut dyn InferenceProgressObserver,
) -> Result<EnsembleResult, InferenceError> {
    if options.n_bootstraps == 0 {
        return Err(InferenceError::InvalidParameter(
            "an ensemble needs at least one bootstrap".to_string(),
        ));
    }
    log::info!(
        "Ensemble of {} clustered inferences (train_size {})",
        options.n_bootstraps,
        options.train_size
    );

    progress.on_stage_start(InferenceStage::Bootstraps, options.n_bootstraps);
    let completed = AtomicUsize::new(0);
    let shared_progress = Mutex::new(progress);
    let runs: Vec<Result<ClusteredInferenceResult, InferenceError>> = (0..options.n_bootstraps)
        .into_par_iter()
        .map(|b| {
            let run_options = InferenceOptions {
                train_size: options.train_size,
                seed: options.inference.seed.wrapping_add(b as u64),
                ..options.inference.clone()
            };
            let result = ClusteredInference::with_method(clusterer, n_clusters, method)
                .options(run_options)
                .run(x, y, groups);
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if let Ok(mut observer) = shared_progress.lock() {
                observer.on_stage_advance(InferenceStage::Bootstraps, done);
            }
            result
        })
        .collect();
    let progress = shared_progress
        .into_inner()
        .map_err(|_| InferenceError::InvalidParameter("progress observer panicked".to_string()))?;
    progress.on_stage_finish(InferenceStage::Bootstraps);

    let runs: Vec<ClusteredInferenceResult> = runs.into_iter().collect::<Result<_, _>>()?;

    let betas: Vec<&Array1<f64>> = runs.iter().map(|run| &run.beta_hat).collect();
    let pvals: Vec<&Array1<f64>> = runs.iter().map(|run| &run.pval).collect();
    let one_minus: Vec<&Array1<f64>> = runs.iter().map(|run| &run.one_minus_pval).collect();

    let beta_hat = stack(&betas)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let pval = aggregate(stack(&pvals).view(), options.aggregation)?;
    let one_minus_pval = aggregate(stack(&one_minus).view(), options.aggregation)?;
    let (pval_corr, one_minus_pval_corr) =
        corrected_pair(pval.view(), one_minus_pval.view(), n_clusters);

    Ok(EnsembleResult {
        beta_hat,
        pval,
        pval_corr,
        one_minus_pval,
        one_minus_pval_corr,
        n_bootstraps: runs.len(),
    })
}
