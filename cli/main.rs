#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use hyperridge::data::load_table;
use hyperridge::estimate::tune_penalty;
use hyperridge::inference::{significance, standard_errors};
use hyperridge::model::{FittedModel, TunerConfig};
use hyperridge::simulate::{
    SimulationConfig, ks_uniform_statistic, null_calibration, run_sweep,
};

#[derive(Args)]
pub struct FitArgs {
    /// Path to a numeric CSV file with a header row
    pub table: PathBuf,

    /// Prior guess of the fraction of response variance explained, strictly inside (0, 1)
    #[arg(long)]
    pub r2: f64,

    /// Name of the response column (defaults to the last column)
    #[arg(long)]
    pub response: Option<String>,

    /// TOML file with tuner settings (initial_penalty, max_iterations, tolerance)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    pub output: PathBuf,

    /// Also report the joint chi-squared test and coefficient standard errors
    #[arg(long)]
    pub significance: bool,
}

#[derive(Args)]
pub struct SimulateArgs {
    /// TOML file with simulation settings; defaults reproduce the AR(1) reference scenario
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// TOML file with tuner settings
    #[arg(long)]
    pub tuner_config: Option<PathBuf>,

    /// Override the number of simulated datasets
    #[arg(long)]
    pub trials: Option<usize>,

    /// Override the base random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of pure-noise fits used to check calibration of the significance test (0 disables it)
    #[arg(long, default_value = "200")]
    pub null_trials: usize,

    /// Worker threads for the sweep (defaults to all cores)
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Parser)]
#[command(
    name = "hyperridge",
    about = "Ridge regression with empirical-Bayes tuning of the penalty",
    long_about = "Fits ridge regression models whose penalty and noise variance are estimated \
                 from the data by hyperpenalized fixed-point iteration."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tune and fit a ridge model on a CSV table
    Fit(FitArgs),
    /// Run a parallel simulation sweep on synthetic AR(1) designs
    Simulate(SimulateArgs),
}

fn load_tuner_config(path: Option<&PathBuf>) -> Result<TunerConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            println!("Loading tuner settings from: {}", path.display());
            Ok(TunerConfig::load(path)?)
        }
        None => Ok(TunerConfig::default()),
    }
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let tuner = load_tuner_config(args.config.as_ref())?;

    println!("Loading data from: {}", args.table.display());
    let table = load_table(&args.table, args.response.as_deref())?;
    println!(
        "Loaded {} rows; response '{}', {} predictors",
        table.y.len(),
        table.response_name,
        table.predictor_names.len()
    );

    // Centering absorbs the intercept; the means are kept for prediction.
    let centered = table.center();

    println!("Tuning ridge penalty with prior r2 = {}", args.r2);
    let result = tune_penalty(centered.x.view(), centered.y.view(), args.r2, &tuner)?;
    if result.converged() {
        println!("Converged after {} iterations.", result.iterations);
    } else {
        println!(
            "WARNING: no convergence within {} iterations (last change {:.3e}); using the last estimate.",
            result.iterations, result.last_change
        );
    }
    println!(
        "lambda = {:.6e}, sigma^2 = {:.6e}, effective df = {:.3}",
        result.fit.penalty, result.fit.noise_variance, result.effective_degrees_of_freedom
    );

    let model = FittedModel::from_tuning(
        &result,
        &tuner,
        args.r2,
        table.predictor_names.clone(),
        &centered.column_means,
        centered.response_mean,
    );
    model.save(&args.output)?;
    println!("Model saved to: {}", args.output.display());

    let errors = if args.significance {
        let gram = centered.x.t().dot(&centered.x);
        let report = significance(
            result.fit.coefficients.view(),
            result.fit.penalty,
            result.fit.noise_variance,
            gram.view(),
        )
        .and_then(|test| {
            let se = standard_errors(result.fit.penalty, result.fit.noise_variance, gram.view())?;
            Ok((test, se))
        });
        match report {
            Ok((test, se)) => {
                println!(
                    "Joint test of all coefficients = 0: chi2 = {:.4} on {} df, p = {:.4e}",
                    test.statistic, test.degrees_of_freedom, test.p_value
                );
                Some(se)
            }
            Err(e) => {
                println!("WARNING: significance test unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    for (idx, (name, coef)) in table
        .predictor_names
        .iter()
        .zip(result.fit.coefficients.iter())
        .enumerate()
    {
        match &errors {
            Some(se) => println!("  {name:>16}  {coef:>12.6}  (se {:.6})", se[idx]),
            None => println!("  {name:>16}  {coef:>12.6}"),
        }
    }
    Ok(())
}

pub fn simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let mut config = match &args.config {
        Some(path) => {
            println!("Loading simulation settings from: {}", path.display());
            SimulationConfig::load(path)?
        }
        None => SimulationConfig::default(),
    };
    if let Some(trials) = args.trials {
        config.trials = trials;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let tuner = load_tuner_config(args.tuner_config.as_ref())?;

    let summary = run_sweep(&config, &tuner)?;
    println!(
        "Simulated {} datasets: n={}, p={}, AR(1) rho={}, noise sd={}",
        summary.trials,
        config.observations,
        config.predictors(),
        config.ar_coefficient,
        config.noise_sd
    );
    println!("Population r2 used as prior: {:.4}", summary.population_r2);
    println!(
        "Converged: {}/{} ({:.1}%), mean iterations {:.1}",
        summary.converged,
        summary.trials,
        100.0 * summary.convergence_rate(),
        summary.mean_iterations
    );
    match summary.theoretical_penalty {
        Some(theory) => println!(
            "Mean lambda {:.4} vs large-sample optimum {:.4} (ratio {:.3})",
            summary.mean_penalty,
            theory,
            summary.mean_penalty / theory
        ),
        None => println!("Mean lambda {:.4}", summary.mean_penalty),
    }
    println!(
        "Mean sigma^2 {:.4} (true {:.4})",
        summary.mean_noise_variance,
        config.noise_sd * config.noise_sd
    );
    println!("  {:>6}  {:>10}  {:>10}", "coef", "true", "mean fit");
    for (idx, (truth, mean)) in config
        .true_coefficients
        .iter()
        .zip(summary.mean_coefficients.iter())
        .enumerate()
    {
        println!("  {:>6}  {truth:>10.4}  {mean:>10.4}", idx + 1);
    }

    if args.null_trials > 0 {
        let p_values = null_calibration(&config, &tuner, summary.population_r2, args.null_trials)?;
        let ks = ks_uniform_statistic(&p_values);
        let rejected = p_values.iter().filter(|&&p| p < 0.05).count();
        println!(
            "Null calibration over {} pure-noise fits: KS distance to Uniform(0,1) = {:.4}, {:.1}% rejected at 5%",
            p_values.len(),
            ks,
            100.0 * rejected as f64 / p_values.len() as f64
        );
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Simulate(args)) => simulate(args),
        None => {
            let mut command = Cli::command();
            match command.print_help() {
                Ok(()) => {
                    println!();
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
