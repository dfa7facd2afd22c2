//! # Gram-based (group) lasso by coordinate descent
//!
//! Minimizes
//!
//! ```text
//! 1/(2n) ‖Y − XW‖²_F + α Σ_j ‖W_j‖₂
//! ```
//!
//! where `W_j` is the j-th row of the `p × T` coefficient matrix. With a
//! single response column (`T = 1`) the row norm is an absolute value and the
//! problem is the ordinary lasso; with `T > 1` it is the multi-task lasso used
//! for temporal outcomes. The solver only touches `XᵀX`, `XᵀY` and `‖Y‖²_F`,
//! which lets nodewise regressions reuse one Gram matrix for every column.
//!
//! Convergence follows the usual two-stage rule: a cheap check on the largest
//! coordinate update, then the duality gap, scaled by `‖Y‖²_F`.

use crate::solver::SolverError;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// Iteration limits shared by every coordinate-descent fit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateDescent {
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for CoordinateDescent {
    fn default() -> Self {
        Self {
            max_iter: 5000,
            tol: 1e-4,
        }
    }
}

/// Sufficient statistics of a least-squares problem.
#[derive(Clone, Copy, Debug)]
pub struct GramProblem<'a> {
    pub gram: ArrayView2<'a, f64>,
    pub xty: ArrayView2<'a, f64>,
    pub yty: f64,
    pub n_samples: usize,
}

impl<'a> GramProblem<'a> {
    pub fn new(
        gram: ArrayView2<'a, f64>,
        xty: ArrayView2<'a, f64>,
        yty: f64,
        n_samples: usize,
    ) -> Result<Self, SolverError> {
        if gram.nrows() != gram.ncols() {
            return Err(SolverError::Dimension(format!(
                "Gram matrix is {}x{}",
                gram.nrows(),
                gram.ncols()
            )));
        }
        if xty.nrows() != gram.nrows() {
            return Err(SolverError::Dimension(format!(
                "XᵀY has {} rows for a Gram matrix of order {}",
                xty.nrows(),
                gram.nrows()
            )));
        }
        if n_samples == 0 {
            return Err(SolverError::Dimension("zero samples".to_string()));
        }
        Ok(Self {
            gram,
            xty,
            yty,
            n_samples,
        })
    }

    pub fn n_features(&self) -> usize {
        self.gram.nrows()
    }

    pub fn n_tasks(&self) -> usize {
        self.xty.ncols()
    }

    /// Smallest penalty for which the all-zero solution is optimal.
    pub fn alpha_max(&self) -> f64 {
        self.xty
            .axis_iter(Axis(0))
            .map(|row| row_norm(row))
            .fold(0.0_f64, f64::max)
            / self.n_samples as f64
    }
}

/// Outcome of a single penalized fit.
#[derive(Clone, Debug)]
pub struct LassoFit {
    /// `p × T` coefficients; row `exclude` (if any) is identically zero.
    pub coef: Array2<f64>,
    pub n_iter: usize,
    pub dual_gap: f64,
    pub tolerance: f64,
    pub converged: bool,
}

impl LassoFit {
    /// Rows with a non-negligible norm relative to the largest row.
    pub fn support_size(&self, relative_tol: f64) -> usize {
        let norms: Vec<f64> = self.coef.axis_iter(Axis(0)).map(row_norm).collect();
        let max_norm = norms.iter().copied().fold(0.0_f64, f64::max);
        if max_norm == 0.0 {
            return 0;
        }
        norms
            .iter()
            .filter(|&&norm| norm > relative_tol * max_norm)
            .count()
    }

    pub fn into_converged(self, solver: &CoordinateDescent) -> Result<Self, SolverError> {
        if self.converged {
            Ok(self)
        } else {
            Err(SolverError::DidNotConverge {
                max_iter: solver.max_iter,
                dual_gap: self.dual_gap,
                tolerance: self.tolerance,
            })
        }
    }
}

fn row_norm(row: ArrayView1<f64>) -> f64 {
    row.iter().map(|v| v * v).sum::<f64>().sqrt()
}

impl CoordinateDescent {
    /// Fits the penalized problem at `alpha`.
    ///
    /// `warm_start` seeds the coefficients (typically the previous point on a
    /// regularization path). `exclude` pins one coordinate at zero, which is
    /// how nodewise regressions drop the response column from the Gram matrix.
    pub fn fit(
        &self,
        problem: &GramProblem<'_>,
        alpha: f64,
        warm_start: Option<&Array2<f64>>,
        exclude: Option<usize>,
    ) -> LassoFit {
        let p = problem.n_features();
        let t = problem.n_tasks();
        let gram = problem.gram;

        let mut coef = match warm_start {
            Some(start) if start.dim() == (p, t) => start.clone(),
            _ => Array2::zeros((p, t)),
        };
        if let Some(j) = exclude {
            coef.row_mut(j).fill(0.0);
        }

        if problem.yty <= 0.0 {
            return LassoFit {
                coef: Array2::zeros((p, t)),
                n_iter: 0,
                dual_gap: 0.0,
                tolerance: 0.0,
                converged: true,
            };
        }

        // grad = XᵀY − G W, i.e. the correlation of each feature with the residual.
        let mut grad = problem.xty.to_owned() - gram.dot(&coef);
        let l1_reg = alpha * problem.n_samples as f64;
        let tolerance = self.tol * problem.yty;

        let mut candidate = vec![0.0_f64; t];
        let mut delta = vec![0.0_f64; t];
        let mut dual_gap = f64::INFINITY;

        for iteration in 0..self.max_iter {
            let mut w_max = 0.0_f64;
            let mut d_w_max = 0.0_f64;

            for j in 0..p {
                if exclude == Some(j) {
                    continue;
                }
                let g_jj = gram[[j, j]];
                if g_jj <= 0.0 {
                    continue;
                }

                let mut norm_sq = 0.0;
                for s in 0..t {
                    candidate[s] = grad[[j, s]] + g_jj * coef[[j, s]];
                    norm_sq += candidate[s] * candidate[s];
                }
                let norm = norm_sq.sqrt();
                let shrink = if norm > l1_reg {
                    (1.0 - l1_reg / norm) / g_jj
                } else {
                    0.0
                };

                let mut d_max = 0.0_f64;
                let mut new_max = 0.0_f64;
                for s in 0..t {
                    let updated = candidate[s] * shrink;
                    delta[s] = updated - coef[[j, s]];
                    coef[[j, s]] = updated;
                    d_max = d_max.max(delta[s].abs());
                    new_max = new_max.max(updated.abs());
                }

                if d_max > 0.0 {
                    let column = gram.column(j);
                    for s in 0..t {
                        if delta[s] != 0.0 {
                            grad.column_mut(s).scaled_add(-delta[s], &column);
                        }
                    }
                }

                d_w_max = d_w_max.max(d_max);
                w_max = w_max.max(new_max);
            }

            let cheap_check = w_max == 0.0 || d_w_max / w_max < self.tol;
            if cheap_check || iteration + 1 == self.max_iter {
                dual_gap = duality_gap(problem, &coef, &grad, l1_reg, exclude);
                if dual_gap < tolerance {
                    return LassoFit {
                        coef,
                        n_iter: iteration + 1,
                        dual_gap,
                        tolerance,
                        converged: true,
                    };
                }
            }
        }

        LassoFit {
            coef,
            n_iter: self.max_iter,
            dual_gap,
            tolerance,
            converged: false,
        }
    }
}

fn duality_gap(
    problem: &GramProblem<'_>,
    coef: &Array2<f64>,
    grad: &Array2<f64>,
    l1_reg: f64,
    exclude: Option<usize>,
) -> f64 {
    let w_dot_xty = (coef * &problem.xty).sum();
    let w_dot_grad = (coef * grad).sum();
    let r_norm2 = (problem.yty - w_dot_xty - w_dot_grad).max(0.0);
    let r_dot_y = problem.yty - w_dot_xty;

    let dual_norm = grad
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(j, _)| exclude != Some(*j))
        .map(|(_, row)| row_norm(row))
        .fold(0.0_f64, f64::max);

    let (scale, mut gap) = if dual_norm > l1_reg {
        let scale = l1_reg / dual_norm;
        (scale, 0.5 * r_norm2 * (1.0 + scale * scale))
    } else {
        (1.0, r_norm2)
    };

    let l1_norm: f64 = coef.axis_iter(Axis(0)).map(row_norm).sum();
    gap += l1_reg * l1_norm - scale * r_dot_y;
    gap
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn gram_stats(x: &Array2<f64>, y: &Array2<f64>) -> (Array2<f64>, Array2<f64>, f64) {
        let gram = x.t().dot(x);
        let xty = x.t().dot(y);
        let yty = y.iter().map(|v| v * v).sum();
        (gram, xty, yty)
    }

    #[test]
    fn orthogonal_design_gives_soft_thresholded_least_squares() {
        // Orthogonal columns scaled so that XᵀX = n I.
        let n = 4.0;
        let x = array![[1.0, 1.0], [1.0, -1.0], [-1.0, 1.0], [-1.0, -1.0]];
        let y = array![[3.0], [1.0], [-1.0], [-3.0]];
        let (gram, xty, yty) = gram_stats(&x, &y);
        let problem = GramProblem::new(gram.view(), xty.view(), yty, 4).unwrap();

        let alpha = 0.5;
        let fit = CoordinateDescent::default().fit(&problem, alpha, None, None);
        assert!(fit.converged);

        let ols = xty.column(0).mapv(|v| v / n);
        for j in 0..2 {
            let expected = ols[j].signum() * (ols[j].abs() - alpha).max(0.0);
            assert_abs_diff_eq!(fit.coef[[j, 0]], expected, epsilon = 1e-8);
        }
    }

    #[test]
    fn alpha_max_zeroes_every_coefficient() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = Array2::from_shape_fn((30, 8), |_| rng.sample(StandardNormal));
        let y = Array2::from_shape_fn((30, 1), |_| rng.sample::<f64, _>(StandardNormal));
        let (gram, xty, yty) = gram_stats(&x, &y);
        let problem = GramProblem::new(gram.view(), xty.view(), yty, 30).unwrap();

        let fit = CoordinateDescent::default().fit(&problem, problem.alpha_max() * 1.0001, None, None);
        assert!(fit.converged);
        assert!(fit.coef.iter().all(|&c| c == 0.0));
        assert_eq!(fit.support_size(1e-8), 0);
    }

    #[test]
    fn excluded_coordinate_stays_at_zero() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = Array2::from_shape_fn((40, 5), |_| rng.sample(StandardNormal));
        let y = x.column(2).to_owned().insert_axis(Axis(1));
        let (gram, xty, yty) = gram_stats(&x, &y);
        let problem = GramProblem::new(gram.view(), xty.view(), yty, 40).unwrap();

        let fit = CoordinateDescent::default().fit(&problem, 1e-3, None, Some(2));
        assert!(fit.converged);
        assert_eq!(fit.coef[[2, 0]], 0.0);
    }

    #[test]
    fn multitask_rows_are_selected_jointly() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 80;
        let x = Array2::from_shape_fn((n, 6), |_| rng.sample(StandardNormal));
        let mut w = Array2::<f64>::zeros((6, 3));
        w.row_mut(1).assign(&array![2.0, 1.5, 1.0]);
        let noise = Array2::from_shape_fn((n, 3), |_| 0.1 * rng.sample::<f64, _>(StandardNormal));
        let y = x.dot(&w) + noise;
        let (gram, xty, yty) = gram_stats(&x, &y);
        let problem = GramProblem::new(gram.view(), xty.view(), yty, n).unwrap();

        let fit = CoordinateDescent::default().fit(&problem, 0.1, None, None);
        assert!(fit.converged);
        for j in 0..6 {
            let row_active = fit.coef.row(j).iter().any(|&c| c != 0.0);
            let row_full = fit.coef.row(j).iter().all(|&c| c != 0.0);
            assert!(!row_active || row_full, "row {j} is partially active");
        }
        assert!(fit.coef.row(1).iter().all(|&c| c > 0.5));
    }

    #[test]
    fn warm_start_reaches_same_solution() {
        let mut rng = StdRng::seed_from_u64(5);
        let x = Array2::from_shape_fn((50, 10), |_| rng.sample(StandardNormal));
        let beta = Array1::from_shape_fn(10, |j| if j < 3 { 1.0 } else { 0.0 });
        let y = (x.dot(&beta) + Array1::from_shape_fn(50, |_| rng.sample::<f64, _>(StandardNormal)))
            .insert_axis(Axis(1));
        let (gram, xty, yty) = gram_stats(&x, &y);
        let problem = GramProblem::new(gram.view(), xty.view(), yty, 50).unwrap();
        let solver = CoordinateDescent {
            max_iter: 10_000,
            tol: 1e-10,
        };

        let cold = solver.fit(&problem, 0.05, None, None);
        let previous = solver.fit(&problem, 0.2, None, None);
        let warm = solver.fit(&problem, 0.05, Some(&previous.coef), None);
        assert!(cold.converged && warm.converged);
        for (a, b) in cold.coef.iter().zip(warm.coef.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn non_convergence_is_reported() {
        let mut rng = StdRng::seed_from_u64(9);
        let x = Array2::from_shape_fn((20, 40), |_| rng.sample(StandardNormal));
        let y = Array2::from_shape_fn((20, 1), |_| rng.sample::<f64, _>(StandardNormal));
        let (gram, xty, yty) = gram_stats(&x, &y);
        let problem = GramProblem::new(gram.view(), xty.view(), yty, 20).unwrap();
        let solver = CoordinateDescent {
            max_iter: 1,
            tol: 1e-12,
        };

        let fit = solver.fit(&problem, 1e-4, None, None);
        assert!(!fit.converged);
        assert!(matches!(
            fit.into_converged(&solver),
            Err(SolverError::DidNotConverge { max_iter: 1, .. })
        ));
    }

    #[test]
    fn inconsistent_statistics_are_rejected() {
        let gram = Array2::<f64>::eye(3);
        let xty = Array2::<f64>::zeros((2, 1));
        assert!(GramProblem::new(gram.view(), xty.view(), 1.0, 10).is_err());
    }
}
