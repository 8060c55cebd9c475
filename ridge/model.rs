use crate::estimate::{EstimationError, TuningResult};
use ndarray::{Array1, ArrayView2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable TOML format of the tuner settings and
// of a fitted model.

/// Settings of the tuning loop. The defaults are the reference constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Starting penalty of the fixed-point iteration.
    pub initial_penalty: f64,
    /// Iteration cap; reaching it ends the run as exhausted, not as an error.
    pub max_iterations: usize,
    /// Absolute tolerance on the squared change of the coefficient vector.
    pub tolerance: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            initial_penalty: 1.0,
            max_iterations: 100,
            tolerance: 1e-4,
        }
    }
}

impl TunerConfig {
    pub fn validate(&self) -> Result<(), EstimationError> {
        if !self.initial_penalty.is_finite() || self.initial_penalty < 0.0 {
            return Err(EstimationError::InvalidArgument(format!(
                "initial_penalty must be finite and non-negative, got {}",
                self.initial_penalty
            )));
        }
        if self.max_iterations == 0 {
            return Err(EstimationError::InvalidArgument(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(EstimationError::InvalidArgument(format!(
                "tolerance must be finite and positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        load_toml(path)
    }
}

/// A tuned ridge model together with the centering it was fitted under.
///
/// Coefficients refer to centered predictors; `predict` subtracts the stored
/// column means and adds back the response mean, which stands in for the
/// intercept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub config: TunerConfig,
    pub r2: f64,
    pub predictor_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub penalty: f64,
    pub noise_variance: f64,
    pub iterations: usize,
    pub converged: bool,
    pub effective_degrees_of_freedom: f64,
    pub column_means: Vec<f64>,
    pub response_mean: f64,
}

/// Custom error type for model loading, saving and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Prediction data has {found} predictor columns, but the model was trained on {expected}.")]
    MismatchedPredictorCount { found: usize, expected: usize },
    #[error("Model file is inconsistent: {0}")]
    Inconsistent(String),
}

impl FittedModel {
    pub fn from_tuning(
        result: &TuningResult,
        config: &TunerConfig,
        r2: f64,
        predictor_names: Vec<String>,
        column_means: &Array1<f64>,
        response_mean: f64,
    ) -> Self {
        Self {
            config: config.clone(),
            r2,
            predictor_names,
            coefficients: result.fit.coefficients.to_vec(),
            penalty: result.fit.penalty,
            noise_variance: result.fit.noise_variance,
            iterations: result.iterations,
            converged: result.converged(),
            effective_degrees_of_freedom: result.effective_degrees_of_freedom,
            column_means: column_means.to_vec(),
            response_mean,
        }
    }

    /// Predicts responses for raw (uncentered) predictor rows.
    pub fn predict(&self, x_new: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if self.column_means.len() != self.coefficients.len() {
            return Err(ModelError::Inconsistent(format!(
                "{} column means for {} coefficients",
                self.column_means.len(),
                self.coefficients.len()
            )));
        }
        if x_new.ncols() != self.coefficients.len() {
            return Err(ModelError::MismatchedPredictorCount {
                found: x_new.ncols(),
                expected: self.coefficients.len(),
            });
        }
        let means = Array1::from(self.column_means.clone());
        let beta = Array1::from(self.coefficients.clone());
        let centered = &x_new - &means;
        Ok(centered.dot(&beta) + self.response_mean)
    }

    /// Saves the model to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a model from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        load_toml(path)
    }
}

/// Reads any TOML-backed settings or artifact.
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ModelError> {
    let toml_string = fs::read_to_string(path)?;
    Ok(toml::from_str(&toml_string)?)
}
