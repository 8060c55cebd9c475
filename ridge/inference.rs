//! Wald-type significance test for a tuned ridge fit.
//!
//! With the penalty held fixed the ridge estimate `b = H^{-1} X^T y`, where
//! `H = X^T X + lambda I`, has covariance `sigma^2 H^{-1} X^T X H^{-1}`. The
//! quadratic form `b^T V^{-1} b` is referred to a chi-squared distribution
//! with `p` degrees of freedom to test `b = 0`.

use crate::estimate::EstimationError;
use crate::faer_ndarray::FaerCholesky;
use faer::Side;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use statrs::distribution::{ChiSquared, ContinuousCDF};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignificanceTest {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
}

fn validate_hyperparameters(
    penalty: f64,
    noise_variance: f64,
    gram: ArrayView2<f64>,
) -> Result<(), EstimationError> {
    if gram.nrows() != gram.ncols() || gram.nrows() == 0 {
        return Err(EstimationError::InvalidArgument(format!(
            "gram matrix must be square and non-empty, got {:?}",
            gram.dim()
        )));
    }
    if !penalty.is_finite() || penalty < 0.0 {
        return Err(EstimationError::InvalidArgument(format!(
            "ridge penalty must be finite and non-negative, got {penalty}"
        )));
    }
    if !noise_variance.is_finite() || noise_variance <= 0.0 {
        return Err(EstimationError::InvalidArgument(format!(
            "noise variance must be finite and positive, got {noise_variance}"
        )));
    }
    if gram.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::NumericalError(
            "gram matrix contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// Asymptotic covariance `sigma^2 H^{-1} X^T X H^{-1}` of the ridge coefficients.
pub fn coefficient_covariance(
    penalty: f64,
    noise_variance: f64,
    gram: ArrayView2<f64>,
) -> Result<Array2<f64>, EstimationError> {
    validate_hyperparameters(penalty, noise_variance, gram)?;
    let p = gram.nrows();

    let h = &gram + &(Array2::<f64>::eye(p) * penalty);
    let h_factor = h.cholesky(Side::Lower).map_err(|e| {
        EstimationError::NumericalError(format!(
            "penalized gram matrix X^T X + lambda I is not invertible (lambda={penalty:.4e}): {e}"
        ))
    })?;

    // H^{-1} G, then (H^{-1} (H^{-1} G)^T)^T = H^{-1} G H^{-1} since H is symmetric.
    let left = h_factor.solve_mat(&gram.to_owned());
    let sandwich = h_factor.solve_mat(&left.t().to_owned()).reversed_axes();

    let mut covariance = sandwich * noise_variance;
    for i in 0..p {
        for j in (i + 1)..p {
            let avg = 0.5 * (covariance[(i, j)] + covariance[(j, i)]);
            covariance[(i, j)] = avg;
            covariance[(j, i)] = avg;
        }
    }
    Ok(covariance)
}

/// Square roots of the diagonal of [`coefficient_covariance`].
pub fn standard_errors(
    penalty: f64,
    noise_variance: f64,
    gram: ArrayView2<f64>,
) -> Result<Array1<f64>, EstimationError> {
    let covariance = coefficient_covariance(penalty, noise_variance, gram)?;
    Ok(covariance.diag().mapv(|v| v.max(0.0).sqrt()))
}

/// Joint test of `b = 0` from a fitted `(b, lambda, sigma^2)` and `X^T X`.
pub fn significance(
    coefficients: ArrayView1<f64>,
    penalty: f64,
    noise_variance: f64,
    gram: ArrayView2<f64>,
) -> Result<SignificanceTest, EstimationError> {
    if coefficients.len() != gram.nrows() {
        return Err(EstimationError::InvalidArgument(format!(
            "{} coefficients for a {}x{} gram matrix",
            coefficients.len(),
            gram.nrows(),
            gram.ncols()
        )));
    }
    let covariance = coefficient_covariance(penalty, noise_variance, gram)?;
    let cov_factor = covariance.cholesky(Side::Lower).map_err(|e| {
        EstimationError::NumericalError(format!(
            "coefficient covariance is singular; X^T X is likely rank-deficient: {e}"
        ))
    })?;

    let beta = coefficients.to_owned();
    let statistic = beta.dot(&cov_factor.solve_vec(&beta));
    if !statistic.is_finite() {
        return Err(EstimationError::NumericalError(format!(
            "chi-squared statistic is not finite: {statistic}"
        )));
    }

    let degrees_of_freedom = coefficients.len();
    let chi2 = ChiSquared::new(degrees_of_freedom as f64)
        .map_err(|e| EstimationError::NumericalError(format!("chi-squared setup failed: {e}")))?;
    let p_value = chi2.sf(statistic.max(0.0));

    log::debug!(
        "Wald test: statistic={:.4}, df={}, p-value={:.4e}",
        statistic,
        degrees_of_freedom,
        p_value
    );

    Ok(SignificanceTest {
        statistic,
        degrees_of_freedom,
        p_value,
    })
}
