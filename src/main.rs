// ========================================================================================
//
//                      Command-line front end for cluster-inference
//
// ========================================================================================
//
// Loads a design matrix and an outcome from delimited text, runs clustered or
// ensembled clustered inference, and writes one line of statistics per feature.
// Settings come from an optional TOML file; command-line flags take precedence.

use clap::{Args, Parser, Subcommand};
use cluster_inference::config::InferenceConfig;
use cluster_inference::ensemble::ensemble_with_progress;
use cluster_inference::io::{read_groups, read_matrix, write_feature_table, write_matrix};
use cluster_inference::progress::{InferenceProgressObserver, InferenceStage};
use cluster_inference::scenario::SimulationBuilder;
use cluster_inference::{ClusteredInference, Method, Response};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{Array2, Axis};
use std::error::Error;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "cluster-inference",
    about = "Clustered desparsified-lasso inference for high-dimensional regression",
    long_about = "Groups strongly correlated features by Ward agglomeration, runs a desparsified \
                 lasso on the cluster-reduced problem and reports per-feature estimates with \
                 one-sided p-values."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Design matrix, one sample per line (.csv, or .tsv/.txt for tab-separated)
    #[arg(long, value_name = "FILE")]
    x: PathBuf,

    /// Outcome: one column for a scalar outcome, one column per time point otherwise
    #[arg(long, value_name = "FILE")]
    y: PathBuf,

    /// Integer group label per sample
    #[arg(long, value_name = "FILE")]
    groups: Option<PathBuf>,

    /// TOML run configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// desparsified-lasso or desparsified-group-lasso
    #[arg(long)]
    method: Option<String>,

    #[arg(long, value_name = "N")]
    n_clusters: Option<usize>,

    /// Feature lattice for the connectivity constraint, e.g. 2000,1,1
    #[arg(long, value_delimiter = ',', num_args = 3, value_name = "NX,NY,NZ")]
    grid: Option<Vec<usize>>,

    #[arg(long)]
    seed: Option<u64>,

    /// Output TSV with one line per feature
    #[arg(long, value_name = "FILE")]
    output: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one clustered inference
    #[command(about = "Run clustered inference (outputs: one TSV line per feature)")]
    Run {
        #[command(flatten)]
        input: InputArgs,

        /// Fraction of samples the clustering is fitted on
        #[arg(long)]
        train_size: Option<f64>,
    },

    /// Run an ensemble of clustered inferences on subsamples
    #[command(about = "Run ensembled clustered inference (outputs: one TSV line per feature)")]
    Ensemble {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long, value_name = "B")]
        n_bootstraps: Option<usize>,

        /// Fraction of samples each bootstrap clustering is fitted on
        #[arg(long)]
        train_size: Option<f64>,

        /// Use adaptive quantile aggregation instead of the median
        #[arg(long)]
        adaptive: bool,
    },

    /// Write a simulated design and outcome
    #[command(about = "Simulate a problem (outputs: x.csv, y.csv, beta.csv)")]
    Simulate {
        /// 1d or temporal
        #[arg(long, default_value = "1d")]
        scenario: String,

        #[arg(long, default_value = "100")]
        n_samples: usize,

        #[arg(long, default_value = "500")]
        n_features: usize,

        #[arg(long, default_value = "30")]
        n_times: usize,

        #[arg(long, default_value = "10")]
        support_size: usize,

        #[arg(long, default_value = "1.0")]
        sigma: f64,

        /// Correlation between neighbouring features
        #[arg(long, default_value = "0.0")]
        rho: f64,

        /// Correlation between neighbouring time points of the noise
        #[arg(long, default_value = "0.0")]
        rho_noise: f64,

        #[arg(long)]
        shuffle: bool,

        #[arg(long, default_value = "0")]
        seed: u64,

        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { input, train_size } => run_command(&input, train_size),
        Commands::Ensemble {
            input,
            n_bootstraps,
            train_size,
            adaptive,
        } => ensemble_command(&input, n_bootstraps, train_size, adaptive),
        Commands::Simulate {
            scenario,
            n_samples,
            n_features,
            n_times,
            support_size,
            sigma,
            rho,
            rho_noise,
            shuffle,
            seed,
            out_dir,
        } => {
            let builder = SimulationBuilder::new(n_samples, n_features)
                .n_times(n_times)
                .support_size(support_size)
                .sigma(sigma)
                .rho(rho)
                .rho_noise(rho_noise)
                .shuffle(shuffle)
                .seed(seed);
            simulate_command(&scenario, builder, &out_dir)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

// ========================================================================================
//                                   Progress reporting
// ========================================================================================

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());

    pb
}

/// Draws one bar per stage on stderr.
#[derive(Default)]
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl InferenceProgressObserver for BarProgress {
    fn on_stage_start(&mut self, stage: InferenceStage, total_steps: usize) {
        self.bar = Some(create_progress_bar(total_steps as u64, stage.describe()));
    }

    fn on_stage_advance(&mut self, _: InferenceStage, completed_steps: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(completed_steps as u64);
        }
    }

    fn on_stage_finish(&mut self, _: InferenceStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

// ========================================================================================
//                                      Commands
// ========================================================================================

struct LoadedInputs {
    config: InferenceConfig,
    x: Array2<f64>,
    y: Array2<f64>,
    groups: Option<Vec<i64>>,
}

impl LoadedInputs {
    fn response(&self) -> Response<'_> {
        if self.y.ncols() == 1 {
            Response::Scalar(self.y.column(0))
        } else {
            Response::Temporal(self.y.view())
        }
    }
}

fn load_inputs(input: &InputArgs) -> Result<LoadedInputs, Box<dyn Error>> {
    let mut config = match &input.config {
        Some(path) => InferenceConfig::load(&path.to_string_lossy())?,
        None => InferenceConfig::default(),
    };
    if let Some(method) = &input.method {
        config.method = method.parse::<Method>()?;
    }
    if let Some(n_clusters) = input.n_clusters {
        config.n_clusters = n_clusters;
    }
    if let Some(grid) = &input.grid {
        if let [n_x, n_y, n_z] = grid[..] {
            config.grid = Some([n_x, n_y, n_z]);
        }
    }
    if let Some(seed) = input.seed {
        config.seed = seed;
    }

    let x = read_matrix(&input.x)?;
    let y = read_matrix(&input.y)?;
    let groups = input.groups.as_deref().map(read_groups).transpose()?;
    eprintln!(
        "> Loaded {} samples, {} features and {} outcome column(s)",
        x.nrows(),
        x.ncols(),
        y.ncols()
    );
    Ok(LoadedInputs { config, x, y, groups })
}

fn run_command(input: &InputArgs, train_size: Option<f64>) -> Result<(), Box<dyn Error>> {
    let mut loaded = load_inputs(input)?;
    if let Some(train_size) = train_size {
        loaded.config.train_size = train_size;
    }
    loaded.config.validate()?;

    let start = Instant::now();
    let clusterer = loaded.config.clusterer();
    let result = ClusteredInference::with_method(
        &clusterer,
        loaded.config.n_clusters,
        loaded.config.method,
    )
    .options(loaded.config.inference_options())
    .run_with_progress(
        loaded.x.view(),
        loaded.response(),
        loaded.groups.as_deref(),
        &mut BarProgress::default(),
    )?;

    write_feature_table(
        &input.output,
        &[
            ("beta_hat", result.beta_hat.view()),
            ("pval", result.pval.view()),
            ("pval_corr", result.pval_corr.view()),
            ("one_minus_pval", result.one_minus_pval.view()),
            ("one_minus_pval_corr", result.one_minus_pval_corr.view()),
        ],
    )?;
    eprintln!(
        "> Wrote {} features to {} in {:.2?}",
        result.n_features(),
        input.output.display(),
        start.elapsed()
    );
    Ok(())
}

fn ensemble_command(
    input: &InputArgs,
    n_bootstraps: Option<usize>,
    train_size: Option<f64>,
    adaptive: bool,
) -> Result<(), Box<dyn Error>> {
    let mut loaded = load_inputs(input)?;
    if let Some(n_bootstraps) = n_bootstraps {
        loaded.config.ensemble.n_bootstraps = n_bootstraps;
    }
    if let Some(train_size) = train_size {
        loaded.config.ensemble.train_size = train_size;
    }
    if adaptive {
        loaded.config.ensemble.adaptive = true;
    }
    loaded.config.validate()?;

    let start = Instant::now();
    let clusterer = loaded.config.clusterer();
    let result = ensemble_with_progress(
        loaded.x.view(),
        loaded.response(),
        &clusterer,
        loaded.config.n_clusters,
        loaded.config.method,
        loaded.groups.as_deref(),
        &loaded.config.ensemble_options(),
        &mut BarProgress::default(),
    )?;

    write_feature_table(
        &input.output,
        &[
            ("beta_hat", result.beta_hat.view()),
            ("pval", result.pval.view()),
            ("pval_corr", result.pval_corr.view()),
            ("one_minus_pval", result.one_minus_pval.view()),
            ("one_minus_pval_corr", result.one_minus_pval_corr.view()),
        ],
    )?;
    eprintln!(
        "> Aggregated {} bootstraps over {} features into {} in {:.2?}",
        result.n_bootstraps,
        result.beta_hat.len(),
        input.output.display(),
        start.elapsed()
    );
    Ok(())
}

fn simulate_command(
    scenario: &str,
    builder: SimulationBuilder,
    out_dir: &Path,
) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(out_dir)?;
    match scenario {
        "1d" => {
            let sim = builder.build();
            write_matrix(&out_dir.join("x.csv"), &sim.x)?;
            write_matrix(&out_dir.join("y.csv"), &sim.y.insert_axis(Axis(1)))?;
            write_matrix(&out_dir.join("beta.csv"), &sim.beta.insert_axis(Axis(1)))?;
        }
        "temporal" => {
            let sim = builder.build_temporal();
            write_matrix(&out_dir.join("x.csv"), &sim.x)?;
            write_matrix(&out_dir.join("y.csv"), &sim.y)?;
            write_matrix(&out_dir.join("beta.csv"), &sim.beta)?;
        }
        other => {
            return Err(format!("Unknown scenario '{other}'. Expected '1d' or 'temporal'").into());
        }
    }
    eprintln!("> Wrote x.csv, y.csv and beta.csv to {}", out_dir.display());
    Ok(())
}
