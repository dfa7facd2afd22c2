//! TOML run configuration.
//!
//! Every field has a default, so a configuration file only needs the keys it
//! changes. Method strings are parsed through [`Method`]'s `FromStr`, so an
//! unknown method in a file is reported the same way as on the command line.

use crate::cluster::{Connectivity, Pooling, WardAgglomeration};
use crate::ensemble::EnsembleOptions;
use crate::pvalue::Aggregation;
use crate::solver::{CoordinateDescent, CrossValidation};
use crate::types::{EngineOptions, InferenceOptions, Method, NoiseModel};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingConfig {
    #[default]
    Mean,
    Median,
}

impl From<PoolingConfig> for Pooling {
    fn from(pooling: PoolingConfig) -> Self {
        match pooling {
            PoolingConfig::Mean => Pooling::Mean,
            PoolingConfig::Median => Pooling::Median,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnsembleConfig {
    pub n_bootstraps: usize,
    pub train_size: f64,
    pub gamma: f64,
    pub adaptive: bool,
    pub gamma_min: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            n_bootstraps: 25,
            train_size: 0.3,
            gamma: 0.5,
            adaptive: false,
            gamma_min: 0.2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub method: Method,
    pub n_clusters: usize,
    /// `[n_x, n_y, n_z]` lattice the features live on; `None` clusters
    /// without a connectivity constraint.
    pub grid: Option<[usize; 3]>,
    pub pooling: PoolingConfig,
    pub train_size: f64,
    pub seed: u64,
    pub nodewise_c: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub cv_folds: usize,
    pub n_alphas: usize,
    pub eps: f64,
    pub noise_model: NoiseModel,
    pub ar_order: usize,
    pub dof_adjustment: bool,
    pub confidence: f64,
    pub ensemble: EnsembleConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let engine = EngineOptions::default();
        Self {
            method: Method::DesparsifiedLasso,
            n_clusters: 200,
            grid: None,
            pooling: PoolingConfig::Mean,
            train_size: 1.0,
            seed: 0,
            nodewise_c: engine.nodewise_c,
            max_iter: engine.nodewise_solver.max_iter,
            tol: engine.nodewise_solver.tol,
            cv_folds: engine.noise_cv.n_folds,
            n_alphas: engine.noise_cv.n_alphas,
            eps: engine.noise_cv.eps,
            noise_model: engine.noise_model,
            ar_order: engine.ar_order,
            dof_adjustment: engine.dof_adjustment,
            confidence: engine.confidence,
            ensemble: EnsembleConfig::default(),
        }
    }
}

impl InferenceConfig {
    /// Saves the configuration to a TOML file.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_clusters == 0 {
            return Err(ConfigError::Invalid("n_clusters must be positive".to_string()));
        }
        if let Some(grid) = self.grid {
            if grid.iter().any(|&side| side == 0) {
                return Err(ConfigError::Invalid(format!(
                    "grid sides must be positive, got {grid:?}"
                )));
            }
        }
        for (name, value) in [
            ("train_size", self.train_size),
            ("ensemble.train_size", self.ensemble.train_size),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must lie in (0, 1], got {value}"
                )));
            }
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "confidence must lie in (0, 1), got {}",
                self.confidence
            )));
        }
        if self.cv_folds < 2 {
            return Err(ConfigError::Invalid(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        Ok(())
    }

    pub fn clusterer(&self) -> WardAgglomeration {
        let ward = WardAgglomeration::new(self.n_clusters);
        match self.grid {
            Some([n_x, n_y, n_z]) => ward.with_connectivity(Connectivity::grid(n_x, n_y, n_z)),
            None => ward,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        let solver = CoordinateDescent {
            max_iter: self.max_iter,
            tol: self.tol,
        };
        EngineOptions {
            nodewise_c: self.nodewise_c,
            nodewise_solver: solver,
            noise_cv: CrossValidation {
                n_folds: self.cv_folds,
                n_alphas: self.n_alphas,
                eps: self.eps,
                solver,
            },
            noise_model: self.noise_model,
            ar_order: self.ar_order,
            dof_adjustment: self.dof_adjustment,
            confidence: self.confidence,
        }
    }

    pub fn inference_options(&self) -> InferenceOptions {
        InferenceOptions {
            train_size: self.train_size,
            seed: self.seed,
            pooling: self.pooling.into(),
            engine: self.engine_options(),
        }
    }

    pub fn ensemble_options(&self) -> EnsembleOptions {
        let aggregation = if self.ensemble.adaptive {
            Aggregation::AdaptiveQuantile {
                gamma_min: self.ensemble.gamma_min,
            }
        } else {
            Aggregation::Quantile {
                gamma: self.ensemble.gamma,
            }
        };
        EnsembleOptions {
            n_bootstraps: self.ensemble.n_bootstraps,
            train_size: self.ensemble.train_size,
            aggregation,
            inference: self.inference_options(),
        }
    }
}
