//! K-fold cross-validated regularization path.
//!
//! The penalty grid is log-spaced from `alpha_max` (computed on all samples)
//! down to `eps · alpha_max`. Folds are contiguous blocks of rows, the first
//! `n % k` folds holding one extra sample. Each fold walks the path with warm
//! starts; the winning penalty minimizes the fold-averaged test error and is
//! refitted on all samples.

use crate::solver::lasso::{CoordinateDescent, GramProblem, LassoFit};
use crate::solver::SolverError;
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossValidation {
    pub n_folds: usize,
    pub n_alphas: usize,
    pub eps: f64,
    pub solver: CoordinateDescent,
}

impl Default for CrossValidation {
    fn default() -> Self {
        Self {
            n_folds: 5,
            n_alphas: 100,
            eps: 1e-3,
            solver: CoordinateDescent::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CrossValidatedFit {
    pub alpha: f64,
    pub alphas: Array1<f64>,
    /// Fold-averaged mean squared error for each penalty of `alphas`.
    pub mse_path: Array1<f64>,
    pub fit: LassoFit,
}

/// Contiguous fold boundaries, `[start, end)` per fold.
pub fn fold_ranges(n_samples: usize, n_folds: usize) -> Vec<(usize, usize)> {
    let base = n_samples / n_folds;
    let extra = n_samples % n_folds;
    let mut ranges = Vec::with_capacity(n_folds);
    let mut start = 0;
    for fold in 0..n_folds {
        let size = base + usize::from(fold < extra);
        ranges.push((start, start + size));
        start += size;
    }
    ranges
}

/// Log-spaced penalties from `alpha_max` down to `eps * alpha_max`.
pub fn alpha_grid(alpha_max: f64, eps: f64, n_alphas: usize) -> Array1<f64> {
    if n_alphas <= 1 {
        return Array1::from_elem(1, alpha_max);
    }
    let hi = alpha_max.log10();
    let lo = (alpha_max * eps).log10();
    Array1::from_shape_fn(n_alphas, |k| {
        let frac = k as f64 / (n_alphas - 1) as f64;
        10f64.powf(hi + (lo - hi) * frac)
    })
}

fn gram_of(x: ArrayView2<f64>, y: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>, f64) {
    let gram = x.t().dot(&x);
    let xty = x.t().dot(&y);
    let yty = y.iter().map(|v| v * v).sum();
    (gram, xty, yty)
}

impl CrossValidation {
    /// Cross-validates the (multi-task) lasso of `y` on `x` and refits the
    /// selected penalty on every sample.
    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
    ) -> Result<CrossValidatedFit, SolverError> {
        let n_samples = x.nrows();
        if y.nrows() != n_samples {
            return Err(SolverError::Dimension(format!(
                "design has {} rows but the response has {}",
                n_samples,
                y.nrows()
            )));
        }
        if self.n_folds < 2 || self.n_folds > n_samples {
            return Err(SolverError::InvalidFolds {
                n_folds: self.n_folds,
                n_samples,
            });
        }

        let (gram, xty, yty) = gram_of(x, y);
        let full = GramProblem::new(gram.view(), xty.view(), yty, n_samples)?;
        let alpha_max = full.alpha_max();
        if alpha_max <= 0.0 {
            let fit = self.solver.fit(&full, 0.0, None, None);
            return Ok(CrossValidatedFit {
                alpha: 0.0,
                alphas: Array1::zeros(1),
                mse_path: Array1::zeros(1),
                fit,
            });
        }
        let alphas = alpha_grid(alpha_max, self.eps, self.n_alphas);

        let folds = fold_ranges(n_samples, self.n_folds);
        let fold_errors: Vec<Result<Array1<f64>, SolverError>> = folds
            .par_iter()
            .map(|&(start, end)| self.fold_path(x, y, start, end, &alphas))
            .collect();

        let mut mse_path = Array1::<f64>::zeros(alphas.len());
        for errors in fold_errors {
            mse_path += &errors?;
        }
        mse_path /= folds.len() as f64;

        let best = mse_path
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |(best_idx, best_mse), (idx, &mse)| {
                if mse < best_mse { (idx, mse) } else { (best_idx, best_mse) }
            })
            .0;
        let alpha = alphas[best];
        log::debug!(
            "Cross-validation selected alpha {:.4e} ({} of {}) with mse {:.4e}",
            alpha,
            best + 1,
            alphas.len(),
            mse_path[best]
        );

        let mut warm: Option<Array2<f64>> = None;
        for &path_alpha in alphas.iter().take(best) {
            warm = Some(self.solver.fit(&full, path_alpha, warm.as_ref(), None).coef);
        }
        let fit = self
            .solver
            .fit(&full, alpha, warm.as_ref(), None)
            .into_converged(&self.solver)?;

        Ok(CrossValidatedFit {
            alpha,
            alphas,
            mse_path,
            fit,
        })
    }

    fn fold_path(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        start: usize,
        end: usize,
        alphas: &Array1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        let n_samples = x.nrows();
        let train: Vec<usize> = (0..start).chain(end..n_samples).collect();
        let x_train = x.select(Axis(0), &train);
        let y_train = y.select(Axis(0), &train);
        let x_test = x.slice(s![start..end, ..]);
        let y_test = y.slice(s![start..end, ..]);

        let (gram, xty, yty) = gram_of(x_train.view(), y_train.view());
        let problem = GramProblem::new(gram.view(), xty.view(), yty, train.len())?;
        let denom = (y_test.len()).max(1) as f64;

        let mut errors = Array1::<f64>::zeros(alphas.len());
        let mut warm: Option<Array2<f64>> = None;
        for (k, &alpha) in alphas.iter().enumerate() {
            let fit = self.solver.fit(&problem, alpha, warm.as_ref(), None);
            if !fit.converged {
                log::debug!(
                    "Fold [{start}, {end}) did not converge at alpha {:.4e} (gap {:.3e})",
                    alpha,
                    fit.dual_gap
                );
            }
            let residual = &y_test - &x_test.dot(&fit.coef);
            errors[k] = residual.iter().map(|r| r * r).sum::<f64>() / denom;
            warm = Some(fit.coef);
        }
        Ok(errors)
    }
}
