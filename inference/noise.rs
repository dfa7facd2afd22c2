//! Noise estimation for the debiased estimators.
//!
//! Both estimators fit a cross-validated lasso (multi-task for temporal
//! outcomes), take its residuals, and divide the residual sum of squares by
//! `n − |support|`.

use crate::solver::faer_ndarray::{FaerCholesky, clip_to_positive_definite};
use crate::solver::{CrossValidatedFit, CrossValidation};
use crate::types::{InferenceError, NoiseModel};
use faer::Side;
use ndarray::{Array1, Array2, ArrayView2, s};

/// Smallest eigenvalue kept in a noise covariance, relative to the largest.
const EIGENVALUE_FLOOR: f64 = 1e-10;

/// Scalar noise level and the lasso fit it was derived from.
#[derive(Clone, Debug)]
pub struct NoiseEstimate {
    pub sigma: f64,
    /// `p × 1` cross-validated lasso coefficients.
    pub beta_lasso: Array2<f64>,
    pub residual: Array1<f64>,
    pub support: usize,
    pub alpha: f64,
}

/// Temporal noise covariance and the multi-task fit it was derived from.
#[derive(Clone, Debug)]
pub struct TemporalNoiseEstimate {
    /// `n_times × n_times`, positive definite.
    pub covariance: Array2<f64>,
    /// `p × n_times`.
    pub beta_lasso: Array2<f64>,
    pub support: usize,
    pub alpha: f64,
}

fn residual_dof(n_samples: usize, support: usize) -> Result<f64, InferenceError> {
    if support >= n_samples {
        return Err(InferenceError::InvalidParameter(format!(
            "the lasso selected {support} features for {n_samples} samples; no residual degrees of freedom remain"
        )));
    }
    Ok((n_samples - support) as f64)
}

fn cross_validated_residuals(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    cv: &CrossValidation,
) -> Result<(CrossValidatedFit, Array2<f64>), InferenceError> {
    let fitted = cv.fit(x, y)?;
    let residual = &y - &x.dot(&fitted.fit.coef);
    Ok((fitted, residual))
}

/// Noise level of a scalar outcome from the residuals of a cross-validated
/// lasso.
pub fn reid(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    cv: &CrossValidation,
) -> Result<NoiseEstimate, InferenceError> {
    let (fitted, residual) = cross_validated_residuals(x, y, cv)?;
    let support = fitted.fit.support_size(0.0);
    let dof = residual_dof(x.nrows(), support)?;
    let rss: f64 = residual.iter().map(|r| r * r).sum();
    let sigma = (rss / dof).sqrt();
    log::info!(
        "Noise level {:.4} from cross-validated lasso (alpha {:.3e}, support {})",
        sigma,
        fitted.alpha,
        support
    );
    Ok(NoiseEstimate {
        sigma,
        beta_lasso: fitted.fit.coef,
        residual: residual.column(0).to_owned(),
        support,
        alpha: fitted.alpha,
    })
}

/// Noise covariance across time points from the residuals of a
/// cross-validated multi-task lasso.
pub fn group_reid(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    cv: &CrossValidation,
    model: NoiseModel,
    ar_order: usize,
) -> Result<TemporalNoiseEstimate, InferenceError> {
    let n_times = y.ncols();
    let (fitted, residual) = cross_validated_residuals(x, y, cv)?;
    let support = fitted.fit.support_size(0.0);
    let dof = residual_dof(x.nrows(), support)?;
    let empirical = residual.t().dot(&residual) / dof;

    let covariance = match model {
        NoiseModel::Empirical => clip_to_positive_definite(&empirical, EIGENVALUE_FLOOR)?,
        NoiseModel::Ar => autoregressive_covariance(&empirical, ar_order)?,
    };
    log::info!(
        "Temporal noise covariance over {} time points ({:?} model, alpha {:.3e}, support {})",
        n_times,
        model,
        fitted.alpha,
        support
    );
    Ok(TemporalNoiseEstimate {
        covariance,
        beta_lasso: fitted.fit.coef,
        support,
        alpha: fitted.alpha,
    })
}

/// Average correlation at each lag `0..=max_lag` of a covariance matrix.
pub fn mean_lag_correlations(covariance: &Array2<f64>, max_lag: usize) -> Array1<f64> {
    let n = covariance.nrows();
    let scale: Array1<f64> = covariance.diag().mapv(|v| v.max(0.0).sqrt());
    Array1::from_shape_fn(max_lag + 1, |lag| {
        if lag >= n {
            return 0.0;
        }
        let mut total = 0.0;
        for i in 0..(n - lag) {
            let denom = scale[i] * scale[i + lag];
            total += if denom > 0.0 {
                covariance[[i, i + lag]] / denom
            } else {
                0.0
            };
        }
        total / (n - lag) as f64
    })
}

/// Stationary AR(`order`) covariance fitted to `empirical` by Yule–Walker.
///
/// The variance is the mean of the empirical diagonal. The AR coefficients
/// solve the Toeplitz system of the mean lag correlations, and the implied
/// autocorrelation is extended to every lag by the AR recursion.
pub fn autoregressive_covariance(
    empirical: &Array2<f64>,
    order: usize,
) -> Result<Array2<f64>, InferenceError> {
    let n_times = empirical.nrows();
    let variance = empirical.diag().mean().unwrap_or(0.0);
    if !(variance > 0.0) {
        return Err(InferenceError::NonPositiveVariance {
            index: 0,
            value: variance,
        });
    }
    if order == 0 || n_times == 1 {
        return Ok(Array2::eye(n_times) * variance);
    }
    let order = order.min(n_times - 1);
    let rho = mean_lag_correlations(empirical, order);

    let toeplitz = Array2::from_shape_fn((order, order), |(i, j)| rho[i.abs_diff(j)]);
    let rhs = rho.slice(s![1..=order]).to_owned();
    let coefficients = toeplitz.cholesky(Side::Lower)?.solve_vec(&rhs);

    let mut autocorrelation = Array1::<f64>::zeros(n_times);
    autocorrelation[0] = 1.0;
    for lag in 1..n_times {
        autocorrelation[lag] = if lag <= order {
            rho[lag]
        } else {
            (1..=order)
                .map(|k| coefficients[k - 1] * autocorrelation[lag - k])
                .sum()
        };
    }

    let covariance = Array2::from_shape_fn((n_times, n_times), |(i, j)| {
        variance * autocorrelation[i.abs_diff(j)]
    });
    Ok(clip_to_positive_definite(&covariance, EIGENVALUE_FLOOR)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Axis, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    #[test]
    fn reid_recovers_noise_level() {
        let mut rng = StdRng::seed_from_u64(17);
        let n = 200;
        let p = 50;
        let x = Array2::from_shape_fn((n, p), |_| rng.sample(StandardNormal));
        let mut beta = Array1::<f64>::zeros(p);
        beta[0] = 2.0;
        beta[1] = -1.0;
        let noise = Array1::from_shape_fn(n, |_| 1.5 * rng.sample::<f64, _>(StandardNormal));
        let y = (x.dot(&beta) + noise).insert_axis(Axis(1));

        let cv = CrossValidation {
            n_alphas: 30,
            ..CrossValidation::default()
        };
        let estimate = reid(x.view(), y.view(), &cv).unwrap();
        assert!((estimate.sigma - 1.5).abs() < 0.3, "sigma = {}", estimate.sigma);
        assert_eq!(estimate.residual.len(), n);
    }

    #[test]
    fn lag_correlations_of_ar_matrix() {
        let rho: f64 = 0.6;
        let cov = Array2::from_shape_fn((5, 5), |(i, j)| 2.0 * rho.powi(i.abs_diff(j) as i32));
        let lags = mean_lag_correlations(&cov, 2);
        assert_abs_diff_eq!(lags[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lags[1], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(lags[2], 0.36, epsilon = 1e-12);
    }

    #[test]
    fn ar1_fit_reproduces_ar1_covariance() {
        let rho: f64 = 0.8;
        let cov = Array2::from_shape_fn((6, 6), |(i, j)| 3.0 * rho.powi(i.abs_diff(j) as i32));
        let fitted = autoregressive_covariance(&cov, 1).unwrap();
        for ((i, j), &value) in fitted.indexed_iter() {
            assert_abs_diff_eq!(value, cov[[i, j]], epsilon = 1e-8);
        }
    }

    #[test]
    fn ar2_extends_by_recursion() {
        let cov = array![
            [1.0, 0.5, 0.2, 0.0],
            [0.5, 1.0, 0.5, 0.2],
            [0.2, 0.5, 1.0, 0.5],
            [0.0, 0.2, 0.5, 1.0]
        ];
        let fitted = autoregressive_covariance(&cov, 2).unwrap();
        // Yule–Walker: [1 .5; .5 1] a = [.5; .2]
        let a1 = (0.5 - 0.5 * 0.2) / 0.75;
        let a2 = (0.2 - 0.5 * 0.5) / 0.75;
        assert_abs_diff_eq!(fitted[[0, 1]], 0.5, epsilon = 1e-8);
        assert_abs_diff_eq!(fitted[[0, 2]], 0.2, epsilon = 1e-8);
        assert_abs_diff_eq!(fitted[[0, 3]], a1 * 0.2 + a2 * 0.5, epsilon = 1e-8);
    }

    #[test]
    fn zero_variance_is_an_error() {
        let cov = Array2::<f64>::zeros((3, 3));
        assert!(matches!(
            autoregressive_covariance(&cov, 1),
            Err(InferenceError::NonPositiveVariance { .. })
        ));
    }
}
