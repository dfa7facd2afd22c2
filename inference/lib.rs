#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod clustered;
pub mod config;
pub mod desparsified;
pub mod ensemble;
pub mod group;
pub mod io;
pub mod nodewise;
pub mod noise;
pub mod progress;
pub mod pvalue;
pub mod types;

#[path = "../cluster/mod.rs"]
pub mod cluster;

#[path = "../solver/mod.rs"]
pub mod solver;

// Simulated designs for tests, benchmarks and the `simulate` command
#[path = "../scenario/mod.rs"]
pub mod scenario;

pub use clustered::{ClusteredInference, clustered_inference};
pub use ensemble::{EnsembleOptions, EnsembleResult, ensemble_clustered_inference};
pub use types::{
    ClusteredInferenceResult, EngineOptions, InferenceError, InferenceOptions, Method, NoiseModel,
    Response,
};
