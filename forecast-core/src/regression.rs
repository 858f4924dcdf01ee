//! Ordinary least squares with an intercept.
//!
//! Features are standardized before solving the normal equations so that raw
//! epoch seconds and percentages can share one system. Columns with no
//! variance in the training data cannot be estimated and get a zero
//! coefficient; a vanishing ridge term keeps the system solvable when columns
//! are collinear, which converges to the minimum-norm least-squares solution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const VARIANCE_EPSILON: f64 = 1e-12;
const RIDGE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegressionError {
    #[error("Insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Row has {actual} features, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Normal equations are singular")]
    Singular,
}

/// Multivariate linear regression: y = intercept + Σ coefficient_j · x_j.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearRegression {
    coefficients: Vec<f64>,
    intercept: f64,
    r_squared: f64,
    fitted: bool,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Coefficient of determination on the training data.
    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }

    pub fn fit(&mut self, features: &[Vec<f64>], target: &[f64]) -> Result<(), RegressionError> {
        if features.is_empty() {
            return Err(RegressionError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }
        if features.len() != target.len() {
            return Err(RegressionError::DimensionMismatch {
                expected: features.len(),
                actual: target.len(),
            });
        }
        let p = features[0].len();
        if let Some(row) = features.iter().find(|r| r.len() != p) {
            return Err(RegressionError::DimensionMismatch {
                expected: p,
                actual: row.len(),
            });
        }

        let n = features.len() as f64;
        let means: Vec<f64> = (0..p)
            .map(|j| features.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        let scales: Vec<f64> = (0..p)
            .map(|j| {
                let var = features.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
                var.sqrt()
            })
            .collect();
        let active: Vec<usize> = (0..p).filter(|&j| scales[j] > VARIANCE_EPSILON).collect();

        let y_mean = target.iter().sum::<f64>() / n;
        let standardized: Vec<Vec<f64>> = features
            .iter()
            .map(|r| active.iter().map(|&j| (r[j] - means[j]) / scales[j]).collect())
            .collect();

        let k = active.len();
        let mut gram = vec![vec![0.0; k]; k];
        let mut moment = vec![0.0; k];
        for (z, &y) in standardized.iter().zip(target) {
            let yc = y - y_mean;
            for a in 0..k {
                moment[a] += z[a] * yc;
                for b in 0..k {
                    gram[a][b] += z[a] * z[b];
                }
            }
        }
        for (a, row) in gram.iter_mut().enumerate() {
            row[a] += RIDGE * n;
        }

        let beta = solve(gram, moment)?;

        let mut coefficients = vec![0.0; p];
        for (slot, &j) in active.iter().enumerate() {
            coefficients[j] = beta[slot] / scales[j];
        }
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&means)
                .map(|(c, m)| c * m)
                .sum::<f64>();

        self.coefficients = coefficients;
        self.intercept = intercept;
        self.fitted = true;

        let ss_tot: f64 = target.iter().map(|y| (y - y_mean).powi(2)).sum();
        let ss_res: f64 = features
            .iter()
            .zip(target)
            .map(|(r, y)| (y - self.evaluate(r)).powi(2))
            .sum();
        self.r_squared = if ss_tot > 1e-10 {
            1.0 - ss_res / ss_tot
        } else {
            1.0
        };

        Ok(())
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64, RegressionError> {
        if !self.fitted {
            return Err(RegressionError::NotFitted);
        }
        if row.len() != self.coefficients.len() {
            return Err(RegressionError::DimensionMismatch {
                expected: self.coefficients.len(),
                actual: row.len(),
            });
        }
        Ok(self.evaluate(row))
    }

    fn evaluate(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, RegressionError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .ok_or(RegressionError::Singular)?;
        if a[pivot][col].abs() < f64::MIN_POSITIVE {
            return Err(RegressionError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn recovers_exact_linear_relationship() {
        let features: Vec<Vec<f64>> = (0..20)
            .map(|i| {
                let i = i as f64;
                vec![i, (i * 0.7).sin() * 10.0]
            })
            .collect();
        let target: Vec<f64> = features.iter().map(|r| 2.0 + 3.0 * r[0] - 0.5 * r[1]).collect();

        let mut model = LinearRegression::new();
        model.fit(&features, &target).unwrap();

        assert!(approx(model.intercept(), 2.0));
        assert!(approx(model.coefficients()[0], 3.0));
        assert!(approx(model.coefficients()[1], -0.5));
        assert!(approx(model.r_squared(), 1.0));
        assert!(approx(model.predict_row(&[100.0, 4.0]).unwrap(), 300.0));
    }

    #[test]
    fn handles_epoch_scale_features() {
        let start = 1_678_406_400.0;
        let features: Vec<Vec<f64>> = (0..48)
            .map(|i| vec![start + 3600.0 * i as f64, (i % 7) as f64])
            .collect();
        let target: Vec<f64> = features
            .iter()
            .map(|r| 1.0 + (r[0] - start) / 3600.0 * 0.1 + 2.0 * r[1])
            .collect();

        let mut model = LinearRegression::new();
        model.fit(&features, &target).unwrap();

        let probe = vec![start + 3600.0 * 50.0, 3.0];
        assert!((model.predict_row(&probe).unwrap() - 12.0).abs() < 1e-4);
    }

    #[test]
    fn constant_column_gets_zero_coefficient() {
        let features: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 0.0]).collect();
        let target: Vec<f64> = (0..10).map(|i| 1.0 + 2.0 * i as f64).collect();

        let mut model = LinearRegression::new();
        model.fit(&features, &target).unwrap();

        assert_eq!(model.coefficients()[1], 0.0);
        assert!(approx(model.coefficients()[0], 2.0));
    }

    #[test]
    fn collinear_columns_still_fit() {
        let features: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        let target: Vec<f64> = (0..10).map(|i| 5.0 * i as f64).collect();

        let mut model = LinearRegression::new();
        model.fit(&features, &target).unwrap();

        assert!((model.predict_row(&[20.0, 40.0]).unwrap() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn single_row_predicts_its_target() {
        let mut model = LinearRegression::new();
        model.fit(&[vec![1.0, 2.0]], &[7.5]).unwrap();
        assert!(approx(model.predict_row(&[9.0, 9.0]).unwrap(), 7.5));
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let mut model = LinearRegression::new();
        assert_eq!(
            model.fit(&[], &[]),
            Err(RegressionError::InsufficientData {
                required: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn predict_before_fit_fails() {
        let model = LinearRegression::new();
        assert_eq!(model.predict_row(&[1.0]), Err(RegressionError::NotFitted));
    }

    #[test]
    fn wrong_row_width_fails() {
        let mut model = LinearRegression::new();
        model.fit(&[vec![1.0], vec![2.0]], &[1.0, 2.0]).unwrap();
        assert!(matches!(
            model.predict_row(&[1.0, 2.0]),
            Err(RegressionError::DimensionMismatch { .. })
        ));
    }
}
