//! Conversions between test statistics and one-sided p-values, the
//! multiplicity correction, and quantile aggregation of p-values across
//! repeated runs.
//!
//! One-sided p-values test `H0: β ≤ 0` against a positive effect; the
//! complement `one_minus_pval` tests the negative direction. Both are
//! computed from survival functions (never as `1 − p`) so tiny values keep
//! their precision.

use crate::types::InferenceError;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use statrs::function::erf::erfc;

/// Standard normal survival function `P(Z > z)`.
pub fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Two-sided standard normal quantile for a confidence `level`.
pub fn normal_two_sided_quantile(level: f64) -> Result<f64, InferenceError> {
    if !(level > 0.0 && level < 1.0) {
        return Err(InferenceError::InvalidParameter(format!(
            "confidence level must lie in (0, 1), got {level}"
        )));
    }
    let standard = Normal::new(0.0, 1.0)
        .map_err(|e| InferenceError::InvalidParameter(format!("standard normal: {e}")))?;
    Ok(standard.inverse_cdf(0.5 + level / 2.0))
}

/// One-sided p-values of `β / scale` against the standard normal.
pub fn pval_from_scale(
    beta: ArrayView1<f64>,
    scale: ArrayView1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    let z: Array1<f64> = beta
        .iter()
        .zip(scale.iter())
        .map(|(&b, &s)| b / s)
        .collect();
    let pval = z.mapv(normal_sf);
    let one_minus_pval = z.mapv(|v| normal_sf(-v));
    (pval, one_minus_pval)
}

/// Two-sided chi-square p-values with `df` degrees of freedom.
pub fn chi2_two_sided(scores: ArrayView1<f64>, df: usize) -> Result<Array1<f64>, InferenceError> {
    let chi2 = ChiSquared::new(df as f64)
        .map_err(|e| InferenceError::InvalidParameter(format!("chi-square with {df} dof: {e}")))?;
    Ok(scores.mapv(|score| chi2.sf(score.max(0.0))))
}

/// Splits two-sided p-values into one-sided ones using the sign of the
/// estimate. A zero estimate carries no direction and maps to 0.5.
pub fn one_sided_from_two_sided(
    two_sided: ArrayView1<f64>,
    sign: ArrayView1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    let pval: Array1<f64> = two_sided
        .iter()
        .zip(sign.iter())
        .map(|(&p, &s)| {
            if s > 0.0 {
                p / 2.0
            } else if s < 0.0 {
                1.0 - p / 2.0
            } else {
                0.5
            }
        })
        .collect();
    let one_minus_pval: Array1<f64> = two_sided
        .iter()
        .zip(sign.iter())
        .map(|(&p, &s)| {
            if s > 0.0 {
                1.0 - p / 2.0
            } else if s < 0.0 {
                p / 2.0
            } else {
                0.5
            }
        })
        .collect();
    (pval, one_minus_pval)
}

/// Bonferroni correction of one-sided p-values over `n_tests` tests.
///
/// The two-sided p-value `2·min(p, 1 − p)` is multiplied by `n_tests`,
/// clipped to 1, and folded back on the side of the original value, so a
/// one-sided value moves towards 0.5 and never crosses it.
pub fn bonferroni_one_sided(pval: ArrayView1<f64>, n_tests: usize) -> Array1<f64> {
    let n = n_tests as f64;
    pval.mapv(|p| {
        if p < 0.5 {
            (p * n).min(0.5)
        } else if p > 0.5 {
            (1.0 - (1.0 - p) * n).max(0.5)
        } else {
            0.5
        }
    })
}

/// Corrected counterparts of `(pval, one_minus_pval)`.
pub fn corrected_pair(
    pval: ArrayView1<f64>,
    one_minus_pval: ArrayView1<f64>,
    n_tests: usize,
) -> (Array1<f64>, Array1<f64>) {
    (
        bonferroni_one_sided(pval, n_tests),
        bonferroni_one_sided(one_minus_pval, n_tests),
    )
}

/// Linear-interpolation quantile of an unsorted sample.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            let frac = pos - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

/// How repeated p-values are combined into one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Aggregation {
    /// `min(1, Q_γ(p / γ))` at a fixed quantile γ.
    Quantile { gamma: f64 },
    /// Minimum over a γ grid from `gamma_min` to 1, penalized by
    /// `1 − ln γ_min`.
    AdaptiveQuantile { gamma_min: f64 },
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Quantile { gamma: 0.5 }
    }
}

const ADAPTIVE_GAMMA_STEPS: usize = 30;

fn fixed_quantile(column: &[f64], gamma: f64) -> f64 {
    let scaled: Vec<f64> = column.iter().map(|p| p / gamma).collect();
    quantile(&scaled, gamma).min(1.0)
}

/// Aggregates an `n_runs × n_tests` matrix of p-values column by column.
pub fn aggregate(pvals: ArrayView2<f64>, aggregation: Aggregation) -> Result<Array1<f64>, InferenceError> {
    if pvals.nrows() == 0 {
        return Err(InferenceError::InvalidParameter(
            "cannot aggregate p-values over zero runs".to_string(),
        ));
    }
    match aggregation {
        Aggregation::Quantile { gamma } => {
            if !(gamma > 0.0 && gamma <= 1.0) {
                return Err(InferenceError::InvalidParameter(format!(
                    "gamma must lie in (0, 1], got {gamma}"
                )));
            }
            Ok(pvals
                .axis_iter(Axis(1))
                .map(|column| fixed_quantile(&column.to_vec(), gamma))
                .collect())
        }
        Aggregation::AdaptiveQuantile { gamma_min } => {
            if !(gamma_min > 0.0 && gamma_min < 1.0) {
                return Err(InferenceError::InvalidParameter(format!(
                    "gamma_min must lie in (0, 1), got {gamma_min}"
                )));
            }
            let gammas: Vec<f64> = (0..ADAPTIVE_GAMMA_STEPS)
                .map(|k| gamma_min + (1.0 - gamma_min) * k as f64 / (ADAPTIVE_GAMMA_STEPS - 1) as f64)
                .collect();
            let penalty = 1.0 - gamma_min.ln();
            Ok(pvals
                .axis_iter(Axis(1))
                .map(|column| {
                    let column = column.to_vec();
                    let best = gammas
                        .iter()
                        .map(|&gamma| fixed_quantile(&column, gamma))
                        .fold(f64::INFINITY, f64::min);
                    (penalty * best).min(1.0)
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn normal_survival_matches_reference_values() {
        assert_abs_diff_eq!(normal_sf(0.0), 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(normal_sf(1.959963984540054), 0.025, epsilon = 1e-12);
        assert_abs_diff_eq!(normal_sf(-1.0), 0.841344746068543, epsilon = 1e-12);
        assert!(normal_sf(30.0) > 0.0);
    }

    #[test]
    fn two_sided_quantile_at_95_percent() {
        assert_abs_diff_eq!(normal_two_sided_quantile(0.95).unwrap(), 1.959963984540054, epsilon = 1e-8);
        assert!(normal_two_sided_quantile(1.0).is_err());
    }

    #[test]
    fn one_sided_pvalues_are_complementary() {
        let beta = array![2.0, -1.0, 0.0, 0.3];
        let scale = array![1.0, 0.5, 1.0, 2.0];
        let (pval, one_minus) = pval_from_scale(beta.view(), scale.view());
        for (p, q) in pval.iter().zip(one_minus.iter()) {
            assert_abs_diff_eq!(p + q, 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(pval[2], 0.5, epsilon = 1e-15);
        assert!(pval[0] < 0.05 && pval[1] > 0.95);
    }

    #[test]
    fn chi_square_two_sided_values() {
        // χ²(1) at 3.841 is the 5% critical value.
        let p = chi2_two_sided(array![3.841458820694124, 0.0].view(), 1).unwrap();
        assert_abs_diff_eq!(p[0], 0.05, epsilon = 1e-7);
        assert_abs_diff_eq!(p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn sign_orients_two_sided_values() {
        let (pval, one_minus) =
            one_sided_from_two_sided(array![0.1, 0.1, 0.4].view(), array![1.0, -2.0, 0.0].view());
        assert_eq!(pval.to_vec(), vec![0.05, 0.95, 0.5]);
        assert_eq!(one_minus.to_vec(), vec![0.95, 0.05, 0.5]);
    }

    #[test]
    fn correction_moves_towards_one_half() {
        let pval = array![0.0, 1e-4, 0.01, 0.3, 0.5, 0.7, 0.999];
        let corrected = bonferroni_one_sided(pval.view(), 100);
        assert_eq!(corrected[0], 0.0);
        assert_abs_diff_eq!(corrected[1], 0.01, epsilon = 1e-15);
        assert_eq!(corrected[2], 0.5);
        assert_eq!(corrected[3], 0.5);
        assert_eq!(corrected[4], 0.5);
        assert_eq!(corrected[5], 0.5);
        assert_abs_diff_eq!(corrected[6], 0.9, epsilon = 1e-12);
        for (&p, &c) in pval.iter().zip(corrected.iter()) {
            assert!((0.0..=1.0).contains(&c));
            if p <= 0.5 {
                assert!(c >= p);
            }
        }
    }

    #[test]
    fn corrected_pair_stays_complementary() {
        let pval = array![0.001, 0.4, 0.9999];
        let one_minus = pval.mapv(|p| 1.0 - p);
        let (pc, qc) = corrected_pair(pval.view(), one_minus.view(), 50);
        for (a, b) in pc.iter().zip(qc.iter()) {
            assert_abs_diff_eq!(a + b, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn quantile_interpolates_linearly() {
        assert_abs_diff_eq!(quantile(&[4.0, 1.0, 3.0, 2.0], 0.5), 2.5);
        assert_abs_diff_eq!(quantile(&[1.0, 2.0, 3.0], 0.25), 1.5);
        assert_abs_diff_eq!(quantile(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn median_aggregation_doubles_the_median() {
        let pvals = array![[0.01, 0.6], [0.02, 0.8], [0.03, 0.7]];
        let agg = aggregate(pvals.view(), Aggregation::Quantile { gamma: 0.5 }).unwrap();
        assert_abs_diff_eq!(agg[0], 0.04, epsilon = 1e-12);
        assert_abs_diff_eq!(agg[1], 1.0);
    }

    #[test]
    fn adaptive_aggregation_is_bounded() {
        let pvals = array![[0.001, 0.5], [0.002, 0.9], [0.5, 0.2], [0.003, 0.6]];
        let agg = aggregate(pvals.view(), Aggregation::AdaptiveQuantile { gamma_min: 0.2 }).unwrap();
        assert!(agg.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(agg[0] < 0.05);
    }
}
