//! # Synthetic Inverse Problems
//!
//! Reproducible test beds for the tuner. Designs are lag embeddings of a
//! stationary AR(1) series, so predictor `j` and `k` have population
//! correlation `rho^|j-k|`. All randomness comes from a caller-supplied RNG or
//! from a base seed that is offset per trial, which keeps parallel sweeps
//! independent of the thread count.

use crate::data::{center_columns, center_vector};
use crate::estimate::{EstimationError, PenaltyTuner, tune_penalty};
use crate::faer_ndarray::FaerCholesky;
use crate::inference::{SignificanceTest, significance};
use crate::model::{ModelError, TunerConfig, load_toml};
use crate::solver::{Decomposition, factorize};
use faer::Side;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shape and truth of a simulated regression problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub observations: usize,
    pub ar_coefficient: f64,
    pub true_coefficients: Vec<f64>,
    pub noise_sd: f64,
    pub trials: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            observations: 200,
            ar_coefficient: 0.5,
            true_coefficients: vec![1.0, -1.0, 0.0, 0.0, 0.0],
            noise_sd: 2.0,
            trials: 50,
            seed: 0x5EED_0001,
        }
    }
}

impl SimulationConfig {
    pub fn predictors(&self) -> usize {
        self.true_coefficients.len()
    }

    pub fn validate(&self) -> Result<(), EstimationError> {
        if self.true_coefficients.is_empty() {
            return Err(EstimationError::InvalidArgument(
                "true_coefficients must not be empty".to_string(),
            ));
        }
        if self.observations < self.predictors() {
            return Err(EstimationError::InvalidArgument(format!(
                "need at least as many observations as predictors, got n={}, p={}",
                self.observations,
                self.predictors()
            )));
        }
        if !self.ar_coefficient.is_finite() || self.ar_coefficient.abs() >= 1.0 {
            return Err(EstimationError::InvalidArgument(format!(
                "AR(1) coefficient must lie in (-1, 1), got {}",
                self.ar_coefficient
            )));
        }
        if !self.noise_sd.is_finite() || self.noise_sd <= 0.0 {
            return Err(EstimationError::InvalidArgument(format!(
                "noise_sd must be finite and positive, got {}",
                self.noise_sd
            )));
        }
        if self.true_coefficients.iter().any(|b| !b.is_finite()) {
            return Err(EstimationError::InvalidArgument(
                "true_coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        load_toml(path)
    }

    pub fn true_coefficients(&self) -> Array1<f64> {
        Array1::from(self.true_coefficients.clone())
    }

    pub fn covariance(&self) -> Array2<f64> {
        ar1_covariance(self.predictors(), self.ar_coefficient)
    }

    /// Population `Var(Xb) / (Var(Xb) + sigma^2)`.
    pub fn population_r2(&self) -> f64 {
        population_r2(
            self.true_coefficients().view(),
            self.covariance().view(),
            self.noise_sd * self.noise_sd,
        )
    }

    pub fn theoretical_penalty(&self) -> Result<f64, EstimationError> {
        theoretical_penalty(
            self.true_coefficients().view(),
            self.covariance().view(),
            self.noise_sd * self.noise_sd,
        )
    }
}

/// Correlation matrix `rho^|j-k|` of a unit-variance AR(1) process.
pub fn ar1_covariance(p: usize, rho: f64) -> Array2<f64> {
    Array2::from_shape_fn((p, p), |(j, k)| rho.powi(j.abs_diff(k) as i32))
}

/// Lag embedding of a stationary unit-variance AR(1) series.
///
/// Column `j` holds the series delayed by `j` steps, so rows are consecutive
/// time points and columns are lags.
pub fn ar1_lagged_design<R: Rng + ?Sized>(n: usize, p: usize, rho: f64, rng: &mut R) -> Array2<f64> {
    let len = n + p.saturating_sub(1);
    let innovation_sd = (1.0 - rho * rho).sqrt();
    let mut series = Vec::with_capacity(len);
    let mut current: f64 = rng.sample(StandardNormal);
    series.push(current);
    for _ in 1..len {
        let shock: f64 = rng.sample(StandardNormal);
        current = rho * current + innovation_sd * shock;
        series.push(current);
    }
    Array2::from_shape_fn((n, p), |(i, j)| series[i + p - 1 - j])
}

pub fn population_r2(
    coefficients: ArrayView1<f64>,
    covariance: ArrayView2<f64>,
    noise_variance: f64,
) -> f64 {
    let signal = coefficients.dot(&covariance.dot(&coefficients));
    signal / (signal + noise_variance)
}

/// Large-sample optimal penalty `sigma^2 tr(S^{-1}) / (b^T S^{-1} b)`.
pub fn theoretical_penalty(
    coefficients: ArrayView1<f64>,
    covariance: ArrayView2<f64>,
    noise_variance: f64,
) -> Result<f64, EstimationError> {
    let p = covariance.nrows();
    let factor = covariance.to_owned().cholesky(Side::Lower)?;
    let inverse = factor.solve_mat(&Array2::eye(p));
    let trace = inverse.diag().sum();
    let beta = coefficients.to_owned();
    let quad = beta.dot(&factor.solve_vec(&beta));
    if quad <= 0.0 {
        return Err(EstimationError::InvalidArgument(
            "theoretical penalty is undefined for a zero coefficient vector".to_string(),
        ));
    }
    Ok(noise_variance * trace / quad)
}

/// A centered synthetic design with its response.
#[derive(Debug, Clone)]
pub struct SyntheticProblem {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

fn draw_centered_design<R: Rng + ?Sized>(config: &SimulationConfig, rng: &mut R) -> Array2<f64> {
    let raw = ar1_lagged_design(
        config.observations,
        config.predictors(),
        config.ar_coefficient,
        rng,
    );
    center_columns(raw.view()).0
}

fn draw_noise<R: Rng + ?Sized>(config: &SimulationConfig, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(config.observations, |_| {
        config.noise_sd * rng.sample::<f64, _>(StandardNormal)
    })
}

/// Draws one problem `y = Xb + e` and centers both sides.
pub fn simulate_problem<R: Rng + ?Sized>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Result<SyntheticProblem, EstimationError> {
    config.validate()?;
    let x = draw_centered_design(config, &mut *rng);
    let noise = draw_noise(config, &mut *rng);
    let (y, _) = center_vector((x.dot(&config.true_coefficients()) + noise).view());
    Ok(SyntheticProblem { x, y })
}

/// Draws a design with a response of pure noise, unrelated to `X`.
pub fn simulate_null_problem<R: Rng + ?Sized>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Result<SyntheticProblem, EstimationError> {
    config.validate()?;
    let x = draw_centered_design(config, &mut *rng);
    let (y, _) = center_vector(draw_noise(config, &mut *rng).view());
    Ok(SyntheticProblem { x, y })
}

/// Mixed into the base seed so null-calibration draws never replay a sweep trial.
const NULL_STREAM: u64 = 0x6E75_6C6C_0000_0000;

fn trial_rng(seed: u64, trial: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(trial as u64))
}

fn null_trial_rng(seed: u64, trial: usize) -> StdRng {
    trial_rng(seed ^ NULL_STREAM, trial)
}

/// Tunes the penalty on `(x, y)` and tests the fit for significance.
pub fn tune_and_test(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    r2: f64,
    tuner: &TunerConfig,
) -> Result<SignificanceTest, EstimationError> {
    let decomposition = factorize(x)?;
    tune_and_test_with(&decomposition, x, y, r2, tuner)
}

fn tune_and_test_with(
    decomposition: &Decomposition,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    r2: f64,
    tuner: &TunerConfig,
) -> Result<SignificanceTest, EstimationError> {
    let result = PenaltyTuner::new(decomposition, x.view(), y.view(), tuner)?.run(r2)?;
    significance(
        result.fit.coefficients.view(),
        result.fit.penalty,
        result.fit.noise_variance,
        decomposition.gram().view(),
    )
}

/// Refits on `permutations` shuffles of `y` as a negative control.
///
/// Every permutation shares the one decomposition of `x`; shuffles run in
/// parallel, each seeded from `seed` and its index.
pub fn permutation_null(
    decomposition: &Decomposition,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    r2: f64,
    tuner: &TunerConfig,
    permutations: usize,
    seed: u64,
) -> Result<Vec<SignificanceTest>, EstimationError> {
    (0..permutations)
        .into_par_iter()
        .map(|idx| {
            let mut rng = trial_rng(seed, idx);
            let mut shuffled = y.to_vec();
            shuffled.shuffle(&mut rng);
            let shuffled = Array1::from(shuffled);
            tune_and_test_with(decomposition, x, shuffled.view(), r2, tuner)
        })
        .collect()
}

/// Kolmogorov-Smirnov distance between the empirical CDF of `values` and Uniform(0, 1).
pub fn ks_uniform_statistic(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len() as f64;
    sorted
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let v = v.clamp(0.0, 1.0);
            let above = (i as f64 + 1.0) / n - v;
            let below = v - i as f64 / n;
            above.max(below)
        })
        .fold(0.0, f64::max)
}

/// Result of one simulated fit.
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub coefficients: Array1<f64>,
    pub penalty: f64,
    pub noise_variance: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Aggregate over a sweep of independent simulated fits.
#[derive(Debug, Clone)]
pub struct SweepSummary {
    pub trials: usize,
    pub converged: usize,
    pub mean_coefficients: Array1<f64>,
    pub mean_penalty: f64,
    pub mean_noise_variance: f64,
    pub mean_iterations: f64,
    pub population_r2: f64,
    pub theoretical_penalty: Option<f64>,
    pub outcomes: Vec<TrialOutcome>,
}

impl SweepSummary {
    pub fn convergence_rate(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.converged as f64 / self.trials as f64
        }
    }
}

/// Runs `config.trials` independent simulations in parallel, tuning each with
/// the population `r2` of the configured truth.
pub fn run_sweep(
    config: &SimulationConfig,
    tuner: &TunerConfig,
) -> Result<SweepSummary, EstimationError> {
    config.validate()?;
    tuner.validate()?;
    if config.trials == 0 {
        return Err(EstimationError::InvalidArgument(
            "a sweep needs at least one trial".to_string(),
        ));
    }
    let r2 = config.population_r2();
    let theoretical = config.theoretical_penalty().ok();

    log::info!(
        "Running {} simulated fits (n={}, p={}, rho={}, noise sd={}), population r2={:.4}",
        config.trials,
        config.observations,
        config.predictors(),
        config.ar_coefficient,
        config.noise_sd,
        r2
    );

    let outcomes = (0..config.trials)
        .into_par_iter()
        .map(|trial| -> Result<TrialOutcome, EstimationError> {
            let mut rng = trial_rng(config.seed, trial);
            let problem = simulate_problem(config, &mut rng)?;
            let result = tune_penalty(problem.x.view(), problem.y.view(), r2, tuner)?;
            Ok(TrialOutcome {
                converged: result.converged(),
                iterations: result.iterations,
                coefficients: result.fit.coefficients,
                penalty: result.fit.penalty,
                noise_variance: result.fit.noise_variance,
            })
        })
        .collect::<Result<Vec<_>, EstimationError>>()?;

    let count = outcomes.len() as f64;
    let mut mean_coefficients = Array1::<f64>::zeros(config.predictors());
    for outcome in &outcomes {
        mean_coefficients += &outcome.coefficients;
    }
    mean_coefficients /= count;

    let summary = SweepSummary {
        trials: outcomes.len(),
        converged: outcomes.iter().filter(|o| o.converged).count(),
        mean_coefficients,
        mean_penalty: outcomes.iter().map(|o| o.penalty).sum::<f64>() / count,
        mean_noise_variance: outcomes.iter().map(|o| o.noise_variance).sum::<f64>() / count,
        mean_iterations: outcomes.iter().map(|o| o.iterations as f64).sum::<f64>() / count,
        population_r2: r2,
        theoretical_penalty: theoretical,
        outcomes,
    };

    log::info!(
        "Sweep finished: {}/{} converged, mean lambda={:.4}, mean iterations={:.1}",
        summary.converged,
        summary.trials,
        summary.mean_penalty,
        summary.mean_iterations
    );
    Ok(summary)
}

/// p-values of the significance test on `trials` pure-noise responses.
///
/// Under a calibrated test these are close to Uniform(0, 1).
pub fn null_calibration(
    config: &SimulationConfig,
    tuner: &TunerConfig,
    r2: f64,
    trials: usize,
) -> Result<Vec<f64>, EstimationError> {
    config.validate()?;
    (0..trials)
        .into_par_iter()
        .map(|trial| {
            let mut rng = null_trial_rng(config.seed, trial);
            let problem = simulate_null_problem(config, &mut rng)?;
            tune_and_test(problem.x.view(), problem.y.view(), r2, tuner).map(|t| t.p_value)
        })
        .collect()
}
