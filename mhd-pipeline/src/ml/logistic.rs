//! Binary logistic regression
//!
//! Features are standardised with training means/scales, then weights are
//! fitted by full-batch gradient descent on the L2-regularised log loss.
//! Scaling parameters travel with the model so scoring takes raw inputs.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Fitting options
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticParams {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Inverse regularisation strength
    pub c: f64,
    /// Reweight classes inversely to their frequency
    pub balanced: bool,
    /// Stop once every gradient component is below this
    pub tol: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iter: 500,
            learning_rate: 0.5,
            c: 1.0,
            balanced: false,
            tol: 1e-6,
        }
    }
}

/// Fitted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub iterations: usize,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl LogisticRegression {
    /// Fit on row-major `x` against 0/1 targets `y`
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &LogisticParams) -> PipelineResult<Self> {
        let n = x.len();
        if n == 0 || n != y.len() {
            return Err(PipelineError::InsufficientData(format!(
                "logistic regression needs matching non-empty rows, got {} rows and {} targets",
                n,
                y.len()
            )));
        }
        let dim = x[0].len();
        let positives = y.iter().filter(|&&v| v >= 0.5).count();
        if positives == 0 || positives == n {
            return Err(PipelineError::DegenerateTarget(format!(
                "training target has a single class ({} of {} positive)",
                positives, n
            )));
        }

        let (means, scales) = standardisation(x, dim);
        let z: Vec<Vec<f64>> = x
            .iter()
            .map(|row| scale_row(row, &means, &scales))
            .collect();

        let sample_weights: Vec<f64> = if params.balanced {
            let w_pos = n as f64 / (2.0 * positives as f64);
            let w_neg = n as f64 / (2.0 * (n - positives) as f64);
            y.iter().map(|&v| if v >= 0.5 { w_pos } else { w_neg }).collect()
        } else {
            vec![1.0; n]
        };
        let weight_sum: f64 = sample_weights.iter().sum();
        let lambda = 1.0 / (params.c * weight_sum);

        let mut weights = vec![0.0; dim];
        let mut bias = 0.0;
        let mut iterations = 0;
        for _ in 0..params.max_iter {
            iterations += 1;
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;
            for ((row, &target), &sw) in z.iter().zip(y.iter()).zip(sample_weights.iter()) {
                let p = sigmoid(dot(row, &weights) + bias);
                let err = sw * (p - target);
                for (g, v) in grad_w.iter_mut().zip(row.iter()) {
                    *g += err * v;
                }
                grad_b += err;
            }
            let mut max_grad = (grad_b / weight_sum).abs();
            for (g, w) in grad_w.iter_mut().zip(weights.iter()) {
                *g = *g / weight_sum + lambda * w;
                max_grad = max_grad.max(g.abs());
            }
            for (w, g) in weights.iter_mut().zip(grad_w.iter()) {
                *w -= params.learning_rate * g;
            }
            bias -= params.learning_rate * grad_b / weight_sum;

            if max_grad < params.tol {
                break;
            }
        }

        Ok(Self {
            means,
            scales,
            weights,
            bias,
            iterations,
        })
    }

    /// Positive-class probability of one raw row
    pub fn predict_proba_row(&self, row: &[f64]) -> f64 {
        let z = scale_row(row, &self.means, &self.scales);
        sigmoid(dot(&z, &self.weights) + self.bias)
    }

    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_proba_row(row)).collect()
    }
}

fn standardisation(x: &[Vec<f64>], dim: usize) -> (Vec<f64>, Vec<f64>) {
    let n = x.len() as f64;
    let mut means = vec![0.0; dim];
    for row in x {
        for (m, v) in means.iter_mut().zip(row.iter()) {
            *m += v / n;
        }
    }
    let mut scales = vec![0.0; dim];
    for row in x {
        for ((s, v), m) in scales.iter_mut().zip(row.iter()).zip(means.iter()) {
            *s += (v - m).powi(2) / n;
        }
    }
    for s in scales.iter_mut() {
        *s = s.sqrt();
        // constant column
        if *s < 1e-12 {
            *s = 1.0;
        }
    }
    (means, scales)
}

fn scale_row(row: &[f64], means: &[f64], scales: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(means.iter().zip(scales.iter()))
        .map(|(v, (m, s))| (v - m) / s)
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
