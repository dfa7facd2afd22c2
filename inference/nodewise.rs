//! Nodewise lasso: an approximate inverse of the design covariance built one
//! column at a time.
//!
//! For every column `x_j` a lasso regression on the remaining columns gives
//! the residual `z_j`, which is (nearly) orthogonal to every other column but
//! still correlated with `x_j`. The residuals serve both as the projection
//! directions of the bias correction and as the variance of each debiased
//! coordinate.

use crate::solver::{CoordinateDescent, GramProblem};
use crate::types::InferenceError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

/// Residual directions for a reduced design of `n` samples and `p` columns.
#[derive(Clone, Debug)]
pub struct Nodewise {
    /// `n × p`, column `j` is the residual of `x_j` on the other columns.
    pub z: Array2<f64>,
    /// `z_j · x_j`, strictly positive.
    pub zx: Array1<f64>,
    /// `n ‖z_j‖² / (z_j · x_j)²`, the diagonal of the precision estimate.
    pub omega_diag: Array1<f64>,
}

/// Penalty of each nodewise regression: `c · max_{k≠j} |G_jk| / n`.
pub fn nodewise_alphas(gram: ArrayView2<f64>, c: f64, n_samples: usize) -> Array1<f64> {
    Array1::from_shape_fn(gram.nrows(), |j| {
        let off_diagonal_max = gram
            .column(j)
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != j)
            .map(|(_, g)| g.abs())
            .fold(0.0_f64, f64::max);
        c * off_diagonal_max / n_samples as f64
    })
}

impl Nodewise {
    /// Runs the `p` nodewise regressions in parallel on the shared Gram
    /// matrix. A regression that fails to converge aborts the whole fit.
    pub fn fit(
        x: ArrayView2<f64>,
        c: f64,
        solver: &CoordinateDescent,
    ) -> Result<Self, InferenceError> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_features < 2 {
            return Err(InferenceError::InvalidParameter(format!(
                "nodewise regressions need at least two columns, got {n_features}"
            )));
        }
        if !(c > 0.0) {
            return Err(InferenceError::InvalidParameter(format!(
                "nodewise penalty factor must be positive, got {c}"
            )));
        }

        let gram = x.t().dot(&x);
        let alphas = nodewise_alphas(gram.view(), c, n_samples);

        let residuals: Vec<Result<Array1<f64>, InferenceError>> = (0..n_features)
            .into_par_iter()
            .map(|j| {
                let xty = gram.column(j).insert_axis(Axis(1));
                let problem = GramProblem::new(gram.view(), xty, gram[[j, j]], n_samples)?;
                let fit = solver
                    .fit(&problem, alphas[j], None, Some(j))
                    .into_converged(solver)?;
                let fitted = x.dot(&fit.coef.column(0));
                Ok(&x.column(j) - &fitted)
            })
            .collect();

        let mut z = Array2::<f64>::zeros((n_samples, n_features));
        for (j, residual) in residuals.into_iter().enumerate() {
            z.column_mut(j).assign(&residual?);
        }

        let mut zx = Array1::<f64>::zeros(n_features);
        let mut omega_diag = Array1::<f64>::zeros(n_features);
        for j in 0..n_features {
            let z_j = z.column(j);
            let dot = z_j.dot(&x.column(j));
            if !(dot > 0.0) {
                return Err(InferenceError::NonPositiveVariance {
                    index: j,
                    value: dot,
                });
            }
            zx[j] = dot;
            omega_diag[j] = n_samples as f64 * z_j.dot(&z_j) / (dot * dot);
        }
        log::debug!(
            "Nodewise lasso: {} regressions, mean omega {:.4}",
            n_features,
            omega_diag.mean().unwrap_or(0.0)
        );

        Ok(Self { z, zx, omega_diag })
    }

    pub fn n_features(&self) -> usize {
        self.zx.len()
    }

    /// Debiased coefficients for every response column:
    ///
    /// ```text
    /// β̂_j = dof · z_jᵀy / z_jᵀx_j − Σ_{k≠j} (z_jᵀx_k / z_jᵀx_j) β_k
    /// ```
    ///
    /// `beta_lasso` is the `p × T` initial lasso estimate.
    pub fn debias(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        beta_lasso: ArrayView2<f64>,
        dof_factor: f64,
    ) -> Array2<f64> {
        let zty = self.z.t().dot(&y);
        let projected = self.z.t().dot(&x).dot(&beta_lasso);
        let mut beta = Array2::<f64>::zeros(zty.raw_dim());
        for ((j, t), value) in beta.indexed_iter_mut() {
            let own = self.zx[j] * beta_lasso[[j, t]];
            *value = (dof_factor * zty[[j, t]] - (projected[[j, t]] - own)) / self.zx[j];
        }
        beta
    }

    /// Per-cluster scores `z_ij · e_i` summed within each group, as a
    /// `n_groups × p` matrix.
    pub fn group_scores(
        &self,
        residual: ArrayView1<f64>,
        group_index: &[usize],
        n_groups: usize,
    ) -> Array2<f64> {
        let mut scores = Array2::<f64>::zeros((n_groups, self.n_features()));
        for (i, &g) in group_index.iter().enumerate() {
            let weighted = self.z.row(i).mapv(|z| z * residual[i]);
            let mut row = scores.row_mut(g);
            row += &weighted;
        }
        scores
    }
}

/// Degrees-of-freedom inflation `n / (n − s)` from the lasso support, where
/// the support counts rows above 1% of the largest row norm and is capped at
/// `n − 1`.
pub fn dof_factor(beta_lasso: ArrayView2<f64>, n_samples: usize) -> f64 {
    let norms: Vec<f64> = beta_lasso
        .axis_iter(Axis(0))
        .map(|row| row.dot(&row).sqrt())
        .collect();
    let max_norm = norms.iter().copied().fold(0.0_f64, f64::max);
    if max_norm == 0.0 {
        return 1.0;
    }
    let support = norms.iter().filter(|&&norm| norm > 0.01 * max_norm).count();
    let support = support.min(n_samples.saturating_sub(1));
    n_samples as f64 / (n_samples - support) as f64
}
