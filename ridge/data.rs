//! # Data Loading and Centering
//!
//! Ridge fits in this crate expect a centered design matrix and a centered
//! response; the intercept is absorbed by centering and never estimated. The
//! helpers here make that step explicit for callers.
//!
//! `load_table` reads a plain numeric CSV with a header row. One column is the
//! response (the last one unless named), every other column is a predictor.
//! No missing values are accepted.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::path::Path;
use thiserror::Error;

/// A validated numeric table split into predictors and response.
#[derive(Debug)]
pub struct TableData {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub predictor_names: Vec<String>,
    pub response_name: String,
}

/// The centered view of a [`TableData`] plus the means that were removed.
#[derive(Debug)]
pub struct CenteredData {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub column_means: Array1<f64>,
    pub response_mean: f64,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the CSV reader: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The response column '{0}' was not found in the input header.")]
    ColumnNotFound(String),
    #[error("The input needs at least one predictor column besides the response.")]
    NoPredictors,
    #[error("Row {row}, column '{column}': could not parse '{value}' as a number.")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Row {row}, column '{column}': non-finite value found. All data must be finite.")]
    NonFiniteValue { row: usize, column: String },
    #[error("Row {row} has {found} fields, but the header has {expected}.")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Input contains only {found} data rows, but at least {required} are required.")]
    InsufficientRows { found: usize, required: usize },
}

/// Subtracts column means, returning the centered matrix and the means.
pub fn center_columns(x: ArrayView2<f64>) -> (Array2<f64>, Array1<f64>) {
    let means = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let centered = &x - &means;
    (centered, means)
}

/// Subtracts the mean of `y`.
pub fn center_vector(y: ArrayView1<f64>) -> (Array1<f64>, f64) {
    let mean = y.mean().unwrap_or(0.0);
    (y.mapv(|v| v - mean), mean)
}

impl TableData {
    pub fn center(&self) -> CenteredData {
        let (x, column_means) = center_columns(self.x.view());
        let (y, response_mean) = center_vector(self.y.view());
        CenteredData {
            x,
            y,
            column_means,
            response_mean,
        }
    }
}

/// Loads a numeric CSV table. `response` names the response column; `None`
/// picks the last column.
pub fn load_table(path: impl AsRef<Path>, response: Option<&str>) -> Result<TableData, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let response_idx = match response {
        Some(name) => headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))?,
        None => headers
            .len()
            .checked_sub(1)
            .ok_or_else(|| DataError::ColumnNotFound("<last column>".to_string()))?,
    };
    if headers.len() < 2 {
        return Err(DataError::NoPredictors);
    }

    let predictor_names: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != response_idx)
        .map(|(_, h)| h.clone())
        .collect();

    let mut predictors = Vec::new();
    let mut response_values = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        let row = row_idx + 1;
        if record.len() != headers.len() {
            return Err(DataError::RaggedRow {
                row,
                found: record.len(),
                expected: headers.len(),
            });
        }
        for (col_idx, field) in record.iter().enumerate() {
            let value: f64 = field.parse().map_err(|_| DataError::NonNumeric {
                row,
                column: headers[col_idx].clone(),
                value: field.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DataError::NonFiniteValue {
                    row,
                    column: headers[col_idx].clone(),
                });
            }
            if col_idx == response_idx {
                response_values.push(value);
            } else {
                predictors.push(value);
            }
        }
    }

    let n = response_values.len();
    let required = predictor_names.len() + 1;
    if n < required {
        return Err(DataError::InsufficientRows { found: n, required });
    }

    let x = Array2::from_shape_vec((n, predictor_names.len()), predictors)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    log::info!(
        "Loaded {} rows with {} predictors; response column '{}'",
        n,
        predictor_names.len(),
        headers[response_idx]
    );

    Ok(TableData {
        x,
        y: Array1::from(response_values),
        predictor_names,
        response_name: headers[response_idx].clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn centering_removes_means() {
        let x = array![[1.0, 10.0], [3.0, 20.0], [5.0, 30.0]];
        let (centered, means) = center_columns(x.view());
        assert_abs_diff_eq!(means[0], 3.0);
        assert_abs_diff_eq!(means[1], 20.0);
        for col in centered.columns() {
            assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-12);
        }

        let (y, mean) = center_vector(array![2.0, 4.0, 9.0].view());
        assert_abs_diff_eq!(mean, 5.0);
        assert_abs_diff_eq!(y.sum(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn loads_named_response_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.csv");
        fs::write(
            &path,
            "lag1,target,lag2\n1.0,0.5,2.0\n2.0,1.5,1.0\n3.0,2.5,0.0\n4.0,3.0,-1.0\n",
        )
        .unwrap();

        let table = load_table(&path, Some("target")).unwrap();
        assert_eq!(table.predictor_names, vec!["lag1", "lag2"]);
        assert_eq!(table.response_name, "target");
        assert_eq!(table.x.dim(), (4, 2));
        assert_abs_diff_eq!(table.x[(1, 1)], 1.0);
        assert_abs_diff_eq!(table.y[3], 3.0);

        let centered = table.center();
        assert_abs_diff_eq!(centered.response_mean, 1.875);
        assert_abs_diff_eq!(centered.column_means[0], 2.5);
    }

    #[test]
    fn defaults_to_last_column_as_response() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.csv");
        fs::write(&path, "a,b,y\n1,2,3\n4,5,6\n7,8,10\n").unwrap();
        let table = load_table(&path, None).unwrap();
        assert_eq!(table.response_name, "y");
        assert_eq!(table.y.to_vec(), vec![3.0, 6.0, 10.0]);
    }

    #[test]
    fn rejects_bad_tables() {
        let dir = tempdir().unwrap();

        let missing = dir.path().join("missing.csv");
        fs::write(&missing, "a,y\n1,2\n,3\n4,5\n").unwrap();
        assert!(matches!(
            load_table(&missing, None),
            Err(DataError::NonNumeric { row: 2, .. })
        ));

        let nan = dir.path().join("nan.csv");
        fs::write(&nan, "a,y\n1,2\nNaN,3\n4,5\n").unwrap();
        assert!(matches!(
            load_table(&nan, None),
            Err(DataError::NonFiniteValue { .. })
        ));

        let unknown = dir.path().join("unknown.csv");
        fs::write(&unknown, "a,y\n1,2\n3,4\n").unwrap();
        assert!(matches!(
            load_table(&unknown, Some("z")),
            Err(DataError::ColumnNotFound(_))
        ));

        let short = dir.path().join("short.csv");
        fs::write(&short, "a,b,y\n1,2,3\n").unwrap();
        assert!(matches!(
            load_table(&short, None),
            Err(DataError::InsufficientRows { .. })
        ));
    }
}
