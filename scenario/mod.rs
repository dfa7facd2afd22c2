//! Seeded simulations of spatially structured regression problems.
//!
//! Features follow an AR(1) process along the feature axis, so neighbouring
//! columns are strongly correlated and a contiguous block of features at the
//! start of the axis carries the signal. The temporal variant adds an AR(1)
//! process along the time axis of the noise.

use ndarray::{Array1, Array2, s};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Output of [`SimulationBuilder::build`].
#[derive(Clone, Debug)]
pub struct Simulation {
    /// Design matrix (n_samples × n_features)
    pub x: Array2<f64>,
    /// Outcome vector
    pub y: Array1<f64>,
    /// True coefficients: 1 on the support, 0 elsewhere
    pub beta: Array1<f64>,
    /// Scaled noise added to `x · beta`
    pub noise: Array1<f64>,
}

/// Output of [`SimulationBuilder::build_temporal`].
#[derive(Clone, Debug)]
pub struct TemporalSimulation {
    pub x: Array2<f64>,
    /// Outcome matrix (n_samples × n_times)
    pub y: Array2<f64>,
    /// True coefficients (n_features × n_times)
    pub beta: Array2<f64>,
    pub noise: Array2<f64>,
}

impl Simulation {
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }
}

/// Builder for simulated designs.
#[derive(Clone, Debug)]
pub struct SimulationBuilder {
    n_samples: usize,
    n_features: usize,
    n_times: usize,
    support_size: usize,
    sigma: f64,
    rho: f64,
    rho_noise: f64,
    shuffle: bool,
    seed: u64,
}

impl SimulationBuilder {
    pub fn new(n_samples: usize, n_features: usize) -> Self {
        Self {
            n_samples,
            n_features,
            n_times: 30,
            support_size: 10,
            sigma: 1.0,
            rho: 0.0,
            rho_noise: 0.0,
            shuffle: true,
            seed: 0,
        }
    }

    pub fn support_size(mut self, k: usize) -> Self {
        self.support_size = k;
        self
    }

    /// Noise standard deviation.
    pub fn sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    /// Correlation between neighbouring features.
    pub fn rho(mut self, rho: f64) -> Self {
        self.rho = rho.clamp(-1.0, 1.0);
        self
    }

    /// Correlation between neighbouring time points of the noise.
    pub fn rho_noise(mut self, rho: f64) -> Self {
        self.rho_noise = rho.clamp(-1.0, 1.0);
        self
    }

    pub fn n_times(mut self, n_times: usize) -> Self {
        self.n_times = n_times.max(1);
        self
    }

    /// Permute the feature columns after generation.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Simulates a scalar outcome.
    pub fn build(self) -> Simulation {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let x = self.design(&mut rng);
        let beta = self.support_indicator();
        let noise = Array1::from_shape_fn(self.n_samples, |_| {
            self.sigma * rng.sample::<f64, _>(StandardNormal)
        });
        let y = x.dot(&beta) + &noise;
        Simulation { x, y, beta, noise }
    }

    /// Simulates an outcome with `n_times` columns sharing one support.
    pub fn build_temporal(self) -> TemporalSimulation {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let x = self.design(&mut rng);
        let support = self.support_indicator();
        let beta = Array2::from_shape_fn((self.n_features, self.n_times), |(j, _)| support[j]);

        let mut noise = ar1_columns(&mut rng, self.n_samples, self.n_times, self.rho_noise);
        noise.mapv_inplace(|e| self.sigma * e);
        let y = x.dot(&beta) + &noise;
        TemporalSimulation { x, y, beta, noise }
    }

    fn support_indicator(&self) -> Array1<f64> {
        let mut beta = Array1::<f64>::zeros(self.n_features);
        let k = self.support_size.min(self.n_features);
        beta.slice_mut(s![..k]).fill(1.0);
        beta
    }

    fn design(&self, rng: &mut StdRng) -> Array2<f64> {
        let x = ar1_columns(rng, self.n_samples, self.n_features, self.rho);
        if !self.shuffle {
            return x;
        }
        let mut order: Vec<usize> = (0..self.n_features).collect();
        order.shuffle(rng);
        let mut shuffled = Array2::<f64>::zeros(x.raw_dim());
        for (target, &source) in order.iter().enumerate() {
            shuffled.column_mut(target).assign(&x.column(source));
        }
        shuffled
    }
}

/// Columns of unit variance where column `i` is `rho` times column `i - 1`
/// plus fresh Gaussian noise.
fn ar1_columns(rng: &mut StdRng, n_rows: usize, n_cols: usize, rho: f64) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((n_rows, n_cols));
    if n_cols == 0 {
        return out;
    }
    for i in 0..n_rows {
        out[[i, 0]] = rng.sample(StandardNormal);
    }
    let innovation = (1.0 - rho * rho).sqrt();
    for j in 1..n_cols {
        for i in 0..n_rows {
            let fresh: f64 = rng.sample(StandardNormal);
            out[[i, j]] = rho * out[[i, j - 1]] + innovation * fresh;
        }
    }
    out
}
