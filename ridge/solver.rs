//! # Ridge Solves on a Cached Singular Value Decomposition
//!
//! The ridge problem `min ||y - Xb||^2 + lambda ||b||^2` has the closed form
//! `b = V diag(s / (s^2 + lambda)) U^T y` once `X = U diag(s) V^T` is known.
//! Factorizing costs `O(n p^2)`; every subsequent solve for a new `lambda`
//! only rescales the `k = min(n, p)` singular directions. The decomposition is
//! therefore computed exactly once per design matrix and then shared, read-only,
//! across every penalty value requested during tuning.
//!
//! The design matrix and response are expected to be centered by the caller.
//! No intercept is modeled: centering absorbs it.

use crate::estimate::EstimationError;
use crate::faer_ndarray::FaerSvd;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Immutable thin SVD of a design matrix, `X = U diag(s) V^T`.
#[derive(Debug, Clone)]
pub struct Decomposition {
    u: Array2<f64>,
    singular_values: Array1<f64>,
    v: Array2<f64>,
    rank_tolerance: f64,
}

/// Computes the decomposition of `x`. This is the only `O(n p^2)` step of a fit.
pub fn factorize(x: ArrayView2<f64>) -> Result<Decomposition, EstimationError> {
    let (n, p) = x.dim();
    if n == 0 || p == 0 {
        return Err(EstimationError::InvalidArgument(format!(
            "design matrix must be non-empty, got {n}x{p}"
        )));
    }
    if let Some(((row, col), value)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(EstimationError::NumericalError(format!(
            "design matrix contains non-finite value {value} at ({row}, {col})"
        )));
    }

    let (u, singular_values, v) = x.thin_svd()?;
    if !singular_values.iter().all(|s| s.is_finite()) {
        return Err(EstimationError::NumericalError(
            "SVD produced non-finite singular values".to_string(),
        ));
    }

    let largest = singular_values.iter().fold(0.0_f64, |acc, &s| acc.max(s));
    let rank_tolerance = largest * (n.max(p) as f64) * f64::EPSILON;

    log::trace!(
        "Factorized {}x{} design: largest singular value {:.4e}, rank tolerance {:.4e}",
        n,
        p,
        largest,
        rank_tolerance
    );

    Ok(Decomposition {
        u,
        singular_values,
        v,
        rank_tolerance,
    })
}

/// Solves the ridge problem for `lambda`, reusing `decomposition`.
pub fn solve(
    decomposition: &Decomposition,
    y: ArrayView1<f64>,
    lambda: f64,
) -> Result<Array1<f64>, EstimationError> {
    decomposition.solve(y, lambda)
}

fn validate_penalty(lambda: f64) -> Result<(), EstimationError> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(EstimationError::InvalidArgument(format!(
            "ridge penalty must be finite and non-negative, got {lambda}"
        )));
    }
    Ok(())
}

impl Decomposition {
    /// Number of observations `n`.
    pub fn nrows(&self) -> usize {
        self.u.nrows()
    }

    /// Number of predictors `p`.
    pub fn ncols(&self) -> usize {
        self.v.nrows()
    }

    pub fn u(&self) -> ArrayView2<'_, f64> {
        self.u.view()
    }

    pub fn singular_values(&self) -> ArrayView1<'_, f64> {
        self.singular_values.view()
    }

    pub fn v(&self) -> ArrayView2<'_, f64> {
        self.v.view()
    }

    /// Number of singular values above the numerical rank tolerance.
    pub fn rank(&self) -> usize {
        self.singular_values
            .iter()
            .filter(|&&s| s > self.rank_tolerance)
            .count()
    }

    /// Per-direction factors `s / (s^2 + lambda)`.
    ///
    /// Directions whose singular value is numerically zero get weight zero, so
    /// `lambda = 0` on a rank-deficient design yields the minimum-norm solution.
    pub fn shrinkage_weights(&self, lambda: f64) -> Result<Array1<f64>, EstimationError> {
        validate_penalty(lambda)?;
        Ok(self.singular_values.mapv(|s| {
            let denom = s * s + lambda;
            if s <= self.rank_tolerance || denom <= 0.0 {
                0.0
            } else {
                s / denom
            }
        }))
    }

    /// Effective degrees of freedom `sum s^2 / (s^2 + lambda)`, the trace of the hat matrix.
    pub fn effective_degrees_of_freedom(&self, lambda: f64) -> Result<f64, EstimationError> {
        let weights = self.shrinkage_weights(lambda)?;
        Ok(weights
            .iter()
            .zip(self.singular_values.iter())
            .map(|(w, s)| w * s)
            .sum())
    }

    /// Gram matrix `X^T X = V diag(s^2) V^T`, rebuilt without touching `X`.
    pub fn gram(&self) -> Array2<f64> {
        let squared = self.singular_values.mapv(|s| s * s);
        let scaled_v = &self.v * &squared;
        scaled_v.dot(&self.v.t())
    }

    /// Projects a response onto the left singular basis, `U^T y`.
    pub fn project(&self, y: ArrayView1<f64>) -> Result<Array1<f64>, EstimationError> {
        if y.len() != self.nrows() {
            return Err(EstimationError::InvalidArgument(format!(
                "response has length {} but the design has {} rows",
                y.len(),
                self.nrows()
            )));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(EstimationError::NumericalError(
                "response contains non-finite values".to_string(),
            ));
        }
        Ok(self.u.t().dot(&y))
    }

    /// Ridge coefficients from an already projected response `U^T y`.
    pub fn solve_projected(
        &self,
        projected: ArrayView1<f64>,
        lambda: f64,
    ) -> Result<Array1<f64>, EstimationError> {
        if projected.len() != self.singular_values.len() {
            return Err(EstimationError::InvalidArgument(format!(
                "projected response has length {} but the decomposition has {} directions",
                projected.len(),
                self.singular_values.len()
            )));
        }
        let weights = self.shrinkage_weights(lambda)?;
        let scaled = &weights * &projected;
        Ok(self.v.dot(&scaled))
    }

    /// Ridge coefficients `V diag(s / (s^2 + lambda)) U^T y`.
    pub fn solve(&self, y: ArrayView1<f64>, lambda: f64) -> Result<Array1<f64>, EstimationError> {
        validate_penalty(lambda)?;
        let projected = self.project(y)?;
        self.solve_projected(projected.view(), lambda)
    }
}

/// Ridge solver bound to one design, one response and its decomposition.
///
/// `U^T y` is computed once on construction, which keeps each `solve` at
/// `O(p^2)` independent of `n`.
pub struct RidgeSolver<'d, 'v> {
    x: ArrayView2<'v, f64>,
    y: ArrayView1<'v, f64>,
    decomposition: &'d Decomposition,
    projected: Array1<f64>,
}

impl<'d, 'v> RidgeSolver<'d, 'v> {
    pub fn new(
        decomposition: &'d Decomposition,
        x: ArrayView2<'v, f64>,
        y: ArrayView1<'v, f64>,
    ) -> Result<Self, EstimationError> {
        if x.dim() != (decomposition.nrows(), decomposition.ncols()) {
            return Err(EstimationError::InvalidArgument(format!(
                "design is {:?} but the decomposition was computed for {}x{}",
                x.dim(),
                decomposition.nrows(),
                decomposition.ncols()
            )));
        }
        let projected = decomposition.project(y)?;
        Ok(Self {
            x,
            y,
            decomposition,
            projected,
        })
    }

    pub fn decomposition(&self) -> &Decomposition {
        self.decomposition
    }

    pub fn solve(&self, lambda: f64) -> Result<Array1<f64>, EstimationError> {
        self.decomposition
            .solve_projected(self.projected.view(), lambda)
    }

    pub fn fitted(&self, coefficients: &Array1<f64>) -> Array1<f64> {
        self.x.dot(coefficients)
    }

    pub fn residual_sum_of_squares(&self, coefficients: &Array1<f64>) -> f64 {
        let fitted = self.fitted(coefficients);
        self.y
            .iter()
            .zip(fitted.iter())
            .map(|(y, f)| (y - f).powi(2))
            .sum()
    }
}
