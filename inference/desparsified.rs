//! Desparsified lasso for a scalar outcome.
//!
//! The initial estimate is a cross-validated lasso. Each coordinate is then
//! debiased along its nodewise residual direction, which makes it
//! asymptotically normal with variance `σ² ω_j / n`; the one-sided p-value is
//! the normal survival function of the standardized estimate.
//!
//! When samples come in groups (repeated measures), the per-sample scores
//! `z_ij e_i` are summed within each group and the variance is the
//! cluster-robust sandwich over groups, never smaller than the model-based
//! variance.

use crate::nodewise::{Nodewise, dof_factor};
use crate::noise::reid;
use crate::pvalue::{corrected_pair, normal_two_sided_quantile, pval_from_scale};
use crate::types::{ClusterStatistics, ConfidenceBounds, EngineOptions, InferenceError};
use ahash::AHashMap;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// Dense group indices numbered by first appearance, and the number of groups.
pub fn group_index(labels: &[i64]) -> (Vec<usize>, usize) {
    let mut numbering: AHashMap<i64, usize> = AHashMap::new();
    let index = labels
        .iter()
        .map(|label| {
            let next = numbering.len();
            *numbering.entry(*label).or_insert(next)
        })
        .collect();
    (index, numbering.len())
}

/// Runs the scalar engine on an already reduced, standardized design.
pub fn desparsified_lasso(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    groups: Option<&[i64]>,
    options: &EngineOptions,
) -> Result<ClusterStatistics, InferenceError> {
    let (n_samples, n_clusters) = x.dim();
    if y.len() != n_samples {
        return Err(InferenceError::ShapeMismatch {
            what: "outcome length",
            expected: n_samples,
            found: y.len(),
        });
    }
    let y = y.insert_axis(Axis(1));

    let noise = reid(x, y, &options.noise_cv)?;
    let nodewise = Nodewise::fit(x, options.nodewise_c, &options.nodewise_solver)?;

    let dof = if options.dof_adjustment {
        dof_factor(noise.beta_lasso.view(), n_samples)
    } else {
        1.0
    };
    let beta_hat = nodewise
        .debias(x, y, noise.beta_lasso.view(), dof)
        .column(0)
        .to_owned();

    let sigma_sq = noise.sigma * noise.sigma;
    let mut variance: Array1<f64> = nodewise
        .omega_diag
        .mapv(|omega| sigma_sq * omega * dof * dof / n_samples as f64);

    if let Some(labels) = groups {
        if labels.len() != n_samples {
            return Err(InferenceError::ShapeMismatch {
                what: "groups length",
                expected: n_samples,
                found: labels.len(),
            });
        }
        let (index, n_groups) = group_index(labels);
        if n_groups < 2 {
            return Err(InferenceError::InsufficientGroups(n_groups));
        }
        let scores = nodewise.group_scores(noise.residual.view(), &index, n_groups);
        let small_sample = n_groups as f64 / (n_groups - 1) as f64;
        for (j, model_based) in variance.iter_mut().enumerate() {
            let column = scores.column(j);
            let robust = small_sample * column.dot(&column) * dof * dof
                / (nodewise.zx[j] * nodewise.zx[j]);
            *model_based = model_based.max(robust);
        }
        log::info!("Group-robust variance over {} groups", n_groups);
    }

    for (index, (&value, &beta)) in variance.iter().zip(beta_hat.iter()).enumerate() {
        if !beta.is_finite() {
            return Err(InferenceError::NonFiniteStatistic {
                what: "desparsified estimate",
                index,
            });
        }
        if !(value > 0.0) || !value.is_finite() {
            return Err(InferenceError::NonPositiveVariance { index, value });
        }
    }

    let scale = variance.mapv(f64::sqrt);
    let (pval, one_minus_pval) = pval_from_scale(beta_hat.view(), scale.view());
    let (pval_corr, one_minus_pval_corr) =
        corrected_pair(pval.view(), one_minus_pval.view(), n_clusters);

    let quantile = normal_two_sided_quantile(options.confidence)?;
    let confidence = ConfidenceBounds {
        level: options.confidence,
        lower: &beta_hat - &(&scale * quantile),
        upper: &beta_hat + &(&scale * quantile),
    };

    Ok(ClusterStatistics {
        beta_hat,
        beta_hat_temporal: None,
        confidence: Some(confidence),
        pval,
        pval_corr,
        one_minus_pval,
        one_minus_pval_corr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::CrossValidation;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn quick_options() -> EngineOptions {
        EngineOptions {
            noise_cv: CrossValidation {
                n_alphas: 20,
                ..CrossValidation::default()
            },
            ..EngineOptions::default()
        }
    }

    fn sparse_problem(seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = 120;
        let p = 20;
        let x = Array2::from_shape_fn((n, p), |_| rng.sample(StandardNormal));
        let mut beta = Array1::<f64>::zeros(p);
        beta[0] = 1.0;
        beta[1] = -1.0;
        let noise = Array1::from_shape_fn(n, |_| rng.sample::<f64, _>(StandardNormal));
        let y = x.dot(&beta) + noise;
        (x, y)
    }

    #[test]
    fn group_index_numbers_by_first_appearance() {
        let (index, n_groups) = group_index(&[7, 7, -1, 3, -1, 7]);
        assert_eq!(index, vec![0, 0, 1, 2, 1, 0]);
        assert_eq!(n_groups, 3);
    }

    #[test]
    fn detects_positive_and_negative_effects() {
        let (x, y) = sparse_problem(31);
        let stats = desparsified_lasso(x.view(), y.view(), None, &quick_options()).unwrap();
        assert!(stats.pval[0] < 1e-4);
        assert!(stats.one_minus_pval[1] < 1e-4);
        assert!(stats.pval_corr[0] < 0.01);
        assert!(stats.one_minus_pval_corr[1] < 0.01);
        assert!((stats.beta_hat[0] - 1.0).abs() < 0.4);
        for j in 0..20 {
            assert_abs_diff_eq!(stats.pval[j] + stats.one_minus_pval[j], 1.0, epsilon = 1e-12);
            assert!((0.0..=1.0).contains(&stats.pval_corr[j]));
        }
        let bounds = stats.confidence.unwrap();
        assert!(bounds.lower[0] < stats.beta_hat[0] && stats.beta_hat[0] < bounds.upper[0]);
    }

    #[test]
    fn grouped_variance_is_never_smaller() {
        let (x, y) = sparse_problem(5);
        let labels: Vec<i64> = (0..120).map(|i| (i / 12) as i64).collect();
        let options = quick_options();
        let plain = desparsified_lasso(x.view(), y.view(), None, &options).unwrap();
        let grouped = desparsified_lasso(x.view(), y.view(), Some(&labels), &options).unwrap();
        for j in 0..20 {
            assert_abs_diff_eq!(plain.beta_hat[j], grouped.beta_hat[j], epsilon = 1e-12);
            let plain_width = plain.confidence.as_ref().unwrap().upper[j] - plain.beta_hat[j];
            let grouped_width = grouped.confidence.as_ref().unwrap().upper[j] - grouped.beta_hat[j];
            assert!(grouped_width >= plain_width - 1e-12);
        }
    }

    #[test]
    fn single_group_is_rejected() {
        let (x, y) = sparse_problem(2);
        let labels = vec![4_i64; 120];
        assert!(matches!(
            desparsified_lasso(x.view(), y.view(), Some(&labels), &quick_options()),
            Err(InferenceError::InsufficientGroups(1))
        ));
    }

    #[test]
    fn mismatched_outcome_is_rejected() {
        let (x, _) = sparse_problem(2);
        let y = Array1::<f64>::zeros(10);
        assert!(matches!(
            desparsified_lasso(x.view(), y.view(), None, &quick_options()),
            Err(InferenceError::ShapeMismatch { expected: 120, found: 10, .. })
        ));
    }
}
