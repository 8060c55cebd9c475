//! # Hyperpenalized Ridge Tuning
//!
//! Estimates the ridge coefficients, the penalty `lambda` and the noise variance
//! `sigma^2` jointly, by empirical-Bayes fixed-point iteration. The caller only
//! supplies a coarse prior guess `r2` of the fraction of response variance
//! explained by the signal. That guess fixes a hyperprior on the penalty with
//!
//! - shape `a = p / 2`
//! - scale `b = 1 / sqrt(1 / r2 - 1)`
//!
//! and each iteration then alternates:
//!
//! 1.  `sigma^2 = (rss + lambda * bss) / (n + p + 2)`
//! 2.  `lambda  = (p + 2a - 2) / (bss / sigma^2 + 2b)`
//! 3.  a ridge refit at the new `lambda`
//!
//! until the squared change of the coefficient vector drops below the
//! tolerance. The design is factorized once; every refit reuses it.

use crate::faer_ndarray::FaerLinalgError;
use crate::model::TunerConfig;
use crate::solver::{Decomposition, RidgeSolver, factorize};
use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

/// Error type shared by every estimation entry point.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Numerical error: {0}")]
    NumericalError(String),

    #[error("Underlying linear algebra failed: {0}")]
    Linalg(#[from] FaerLinalgError),
}

impl EstimationError {
    /// True for failures caused by the numbers rather than by the call shape.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            EstimationError::NumericalError(_) | EstimationError::Linalg(_)
        )
    }
}

/// Coefficients, penalty and noise variance of one ridge fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub coefficients: Array1<f64>,
    pub penalty: f64,
    pub noise_variance: f64,
}

/// States of the tuning loop. `Converged` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningStatus {
    Iterating,
    Converged,
    Exhausted,
}

/// Outcome of a tuning run.
///
/// An `Exhausted` run still carries the last estimate; callers that need strict
/// convergence should check [`TuningResult::converged`].
#[derive(Debug, Clone)]
pub struct TuningResult {
    pub fit: FitResult,
    pub status: TuningStatus,
    pub iterations: usize,
    /// Squared Euclidean change of the coefficients in the final iteration.
    pub last_change: f64,
    pub effective_degrees_of_freedom: f64,
}

impl TuningResult {
    pub fn converged(&self) -> bool {
        self.status == TuningStatus::Converged
    }
}

/// Hyperprior on the penalty implied by the problem width and the prior `r2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperprior {
    pub shape: f64,
    pub scale: f64,
}

impl Hyperprior {
    pub fn from_r2(num_predictors: usize, r2: f64) -> Result<Self, EstimationError> {
        if !r2.is_finite() || r2 <= 0.0 || r2 >= 1.0 {
            return Err(EstimationError::InvalidArgument(format!(
                "prior r2 must lie strictly inside (0, 1), got {r2}"
            )));
        }
        Ok(Self {
            shape: num_predictors as f64 / 2.0,
            scale: 1.0 / (1.0 / r2 - 1.0).sqrt(),
        })
    }
}

struct TuningState {
    coefficients: Array1<f64>,
    penalty: f64,
    noise_variance: f64,
    iteration: usize,
    last_change: f64,
    status: TuningStatus,
}

/// Factorizes `x` and tunes the ridge penalty for the prior `r2`.
///
/// `x` (n x p, n >= p) and `y` must be centered by the caller.
pub fn tune_penalty(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    r2: f64,
    config: &TunerConfig,
) -> Result<TuningResult, EstimationError> {
    validate_problem(x, y, r2, config)?;
    let decomposition = factorize(x)?;
    PenaltyTuner::new(&decomposition, x.view(), y.view(), config)?.run(r2)
}

fn validate_problem(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    r2: f64,
    config: &TunerConfig,
) -> Result<(), EstimationError> {
    config.validate()?;
    let (n, p) = x.dim();
    if n == 0 || p == 0 {
        return Err(EstimationError::InvalidArgument(format!(
            "design matrix must be non-empty, got {n}x{p}"
        )));
    }
    if p > n {
        return Err(EstimationError::InvalidArgument(format!(
            "penalty tuning needs at least as many observations as predictors, got n={n}, p={p}"
        )));
    }
    if y.len() != n {
        return Err(EstimationError::InvalidArgument(format!(
            "response has length {} but the design has {n} rows",
            y.len()
        )));
    }
    Hyperprior::from_r2(p, r2)?;
    Ok(())
}

/// Empirical-Bayes tuning loop over a borrowed decomposition.
///
/// Building the tuner from an existing [`Decomposition`] lets several responses
/// (for example permutations of `y`) share one factorization.
pub struct PenaltyTuner<'d, 'v> {
    solver: RidgeSolver<'d, 'v>,
    config: &'d TunerConfig,
}

impl<'d, 'v> PenaltyTuner<'d, 'v> {
    pub fn new(
        decomposition: &'d Decomposition,
        x: ArrayView2<'v, f64>,
        y: ArrayView1<'v, f64>,
        config: &'d TunerConfig,
    ) -> Result<Self, EstimationError> {
        let solver = RidgeSolver::new(decomposition, x, y)?;
        Ok(Self { solver, config })
    }

    pub fn run(&self, r2: f64) -> Result<TuningResult, EstimationError> {
        self.config.validate()?;
        let decomposition = self.solver.decomposition();
        let n = decomposition.nrows();
        let p = decomposition.ncols();
        if p > n {
            return Err(EstimationError::InvalidArgument(format!(
                "penalty tuning needs at least as many observations as predictors, got n={n}, p={p}"
            )));
        }
        let prior = Hyperprior::from_r2(p, r2)?;
        let numerator = p as f64 + 2.0 * prior.shape - 2.0;
        let dof = (n + p + 2) as f64;

        log::info!(
            "Starting hyperpenalized ridge tuning: n={}, p={}, r2={:.4}, hyperprior (a={:.3}, b={:.4}), initial lambda={:.4e}",
            n,
            p,
            r2,
            prior.shape,
            prior.scale,
            self.config.initial_penalty
        );

        let mut state = TuningState {
            coefficients: self.solver.solve(self.config.initial_penalty)?,
            penalty: self.config.initial_penalty,
            noise_variance: f64::NAN,
            iteration: 0,
            last_change: f64::INFINITY,
            status: TuningStatus::Iterating,
        };

        while state.status == TuningStatus::Iterating {
            state.iteration += 1;

            let rss = self.solver.residual_sum_of_squares(&state.coefficients);
            let bss = state.coefficients.dot(&state.coefficients);
            let noise_variance = (rss + state.penalty * bss) / dof;
            if !(noise_variance.is_finite() && noise_variance > 0.0) {
                return Err(EstimationError::NumericalError(format!(
                    "noise variance estimate degenerated to {noise_variance} at iteration {} (rss={rss:.4e}, bss={bss:.4e})",
                    state.iteration
                )));
            }

            let penalty = numerator / (bss / noise_variance + 2.0 * prior.scale);
            if !(penalty.is_finite() && penalty >= 0.0) {
                return Err(EstimationError::NumericalError(format!(
                    "penalty update degenerated to {penalty} at iteration {}",
                    state.iteration
                )));
            }

            let refit = self.solver.solve(penalty)?;
            let delta = &refit - &state.coefficients;
            let change = delta.dot(&delta);

            log::debug!(
                "[Tuning Iter #{}] lambda={:.6e}, sigma^2={:.6e}, rss={:.6e}, bss={:.6e}, change={:.3e}",
                state.iteration,
                penalty,
                noise_variance,
                rss,
                bss,
                change
            );

            state.coefficients = refit;
            state.penalty = penalty;
            state.noise_variance = noise_variance;
            state.last_change = change;

            if change < self.config.tolerance {
                state.status = TuningStatus::Converged;
            } else if state.iteration >= self.config.max_iterations {
                state.status = TuningStatus::Exhausted;
            }
        }

        let effective_degrees_of_freedom = decomposition.effective_degrees_of_freedom(state.penalty)?;

        match state.status {
            TuningStatus::Converged => log::info!(
                "Ridge tuning converged after {} iterations: lambda={:.6e}, sigma^2={:.6e}, edf={:.3}",
                state.iteration,
                state.penalty,
                state.noise_variance,
                effective_degrees_of_freedom
            ),
            _ => log::warn!(
                "Ridge tuning did not converge within {} iterations (last change {:.3e} >= tolerance {:.1e}); returning the last estimate",
                state.iteration,
                state.last_change,
                self.config.tolerance
            ),
        }

        Ok(TuningResult {
            fit: FitResult {
                coefficients: state.coefficients,
                penalty: state.penalty,
                noise_variance: state.noise_variance,
            },
            status: state.status,
            iterations: state.iteration,
            last_change: state.last_change,
            effective_degrees_of_freedom,
        })
    }
}
