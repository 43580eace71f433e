#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use kefit::io::{Evaluations, save_evaluations};
use kefit::{BasisConfig, EstimatorConfig, FittedModel, KernelConfig, load_points};

#[derive(Args)]
pub struct FitArgs {
    /// Path to training TSV file: header row, then one point per row
    pub training_data: PathBuf,

    /// Gaussian kernel bandwidth sigma in exp(-|x - y|^2 / sigma)
    #[arg(long)]
    pub sigma: f64,

    /// Ridge regularization applied to the coefficient vector
    #[arg(long, default_value = "0.01")]
    pub lambda: f64,

    /// Use only the first M training points as basis points
    #[arg(long, value_name = "M")]
    pub nystrom: Option<usize>,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct EvalArgs {
    /// Path to test TSV file with the same columns as the training data
    pub test_data: PathBuf,

    /// Path to fitted model file (.toml)
    #[arg(long)]
    pub model: PathBuf,

    /// Where to write per-point log-density and gradient values
    #[arg(long, default_value = "scores.tsv")]
    pub output: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a kernel exponential family density by score matching
    Fit(FitArgs),
    /// Evaluate a fitted density on test points
    Eval(EvalArgs),
}

#[derive(Parser)]
#[command(name = "kefit", version, about = "Kernel exponential family density estimation")]
struct Cli {
    /// Number of worker threads (defaults to one per logical core)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading training data from: {}", args.training_data.display());
    let data = load_points(&args.training_data)?;
    println!(
        "Loaded {} points with {} dimensions",
        data.ncols(),
        data.nrows()
    );

    let basis = match args.nystrom {
        Some(m) => BasisConfig::Nystrom {
            indices: (0..m).collect(),
        },
        None => BasisConfig::Full,
    };
    let config = EstimatorConfig {
        kernel: KernelConfig::Gaussian { sigma: args.sigma },
        lambda: args.lambda,
        basis,
    };

    let mut estimator = config.build(data)?;
    let summary = estimator.fit()?;
    println!(
        "Solved system of size {} (rank {}), eigenspectrum [{:e}, {:e}]",
        summary.system_size, summary.rank, summary.spectrum.min, summary.spectrum.max
    );
    println!("Training objective: {:.6}", estimator.objective()?);

    let model = FittedModel::from_estimator(config, &estimator)?;
    model.save(&args.output)?;
    println!("Model saved to: {}", args.output.display());
    Ok(())
}

pub fn eval(args: EvalArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model.display());
    let mut estimator = FittedModel::load(&args.model)?.into_estimator()?;

    println!("Loading test data from: {}", args.test_data.display());
    let test = load_points(&args.test_data)?;
    estimator.set_test_data(test)?;
    println!("Evaluating {} test points", estimator.num_test());

    let log_pdf = estimator.log_pdf()?;
    let grad = estimator.grad()?;
    let objective = estimator.objective()?;

    save_evaluations(
        &args.output,
        &Evaluations {
            log_pdf: &log_pdf,
            grad: &grad,
        },
    )?;
    println!("Score-matching objective: {objective:.6}");
    println!("Evaluations saved to: {}", args.output.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { threads, command } = Cli::parse();

    if let Some(num_threads) = threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
        {
            eprintln!("Error: failed to configure {num_threads} worker threads: {e}");
            process::exit(1);
        }
    }

    let result = match command {
        Commands::Fit(args) => fit(args),
        Commands::Eval(args) => eval(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
