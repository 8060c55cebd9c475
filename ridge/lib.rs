#![deny(dead_code)]
#![deny(unused_imports)]

//! Ridge regression with hyperpenalized, empirical-Bayes tuning of the penalty.
//!
//! Inputs are a centered design matrix and a centered response; the crate
//! never re-centers them and never models an intercept.

pub mod data;
pub mod estimate;
pub mod faer_ndarray;
pub mod inference;
pub mod model;
pub mod simulate;
pub mod solver;
