use anyhow::{bail, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::models::Outcome;
use crate::services::features::{FeatureVector, FEATURE_COUNT};

pub const NUM_CLASSES: usize = 3;

/// A fitted probabilistic classifier over the three match outcomes.
pub trait Classifier: Send + Sync {
    /// Class probabilities indexed by `Outcome::index`.
    fn predict_proba(&self, features: &FeatureVector) -> [f64; NUM_CLASSES];

    /// Per-class linear weights on the raw feature scale, `[class][feature]`.
    fn class_coefficients(&self) -> [[f64; FEATURE_COUNT]; NUM_CLASSES];

    fn predict(&self, features: &FeatureVector) -> Outcome {
        let probs = self.predict_proba(features);
        let best = (0..NUM_CLASSES)
            .max_by(|a, b| probs[*a].total_cmp(&probs[*b]))
            .unwrap_or(0);
        Outcome::from_index(best).unwrap_or(Outcome::HomeWin)
    }
}

/// Multinomial logistic regression with an L2 penalty, fitted by full-batch
/// gradient descent on standardized inputs.
#[derive(Debug, Clone)]
pub struct SoftmaxRegression {
    pub max_iter: usize,
    /// Inverse regularization strength
    pub c: f64,
    pub learning_rate: f64,
    pub tolerance: f64,
}

impl Default for SoftmaxRegression {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            c: 1.0,
            learning_rate: 0.2,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxModel {
    pub coefficients: [[f64; FEATURE_COUNT]; NUM_CLASSES],
    pub intercepts: [f64; NUM_CLASSES],
    pub iterations: usize,
}

fn softmax(logits: [f64; NUM_CLASSES]) -> [f64; NUM_CLASSES] {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp = logits.map(|z| (z - max).exp());
    let total: f64 = exp.iter().sum();
    exp.map(|e| e / total)
}

/// Column means and scales. Constant columns are passed through untouched.
fn standardization(rows: &[FeatureVector]) -> ([f64; FEATURE_COUNT], [f64; FEATURE_COUNT]) {
    let mut means = [0.0; FEATURE_COUNT];
    let mut scales = [1.0; FEATURE_COUNT];

    for j in 0..FEATURE_COUNT {
        let column: Vec<f64> = rows.iter().map(|r| r.values()[j]).collect();
        let std_dev = column.iter().population_std_dev();
        if std_dev.is_finite() && std_dev > 1e-12 {
            means[j] = column.iter().mean();
            scales[j] = std_dev;
        }
    }

    (means, scales)
}

impl SoftmaxRegression {
    pub fn fit(&self, rows: &[FeatureVector], labels: &[Outcome]) -> Result<SoftmaxModel> {
        if rows.is_empty() {
            bail!("cannot fit a classifier on zero rows");
        }
        if rows.len() != labels.len() {
            bail!("{} feature rows but {} labels", rows.len(), labels.len());
        }

        let n = rows.len();
        let (means, scales) = standardization(rows);
        let lambda = 1.0 / (self.c * n as f64);

        let xs = DMatrix::from_fn(n, FEATURE_COUNT, |i, j| (rows[i].values()[j] - means[j]) / scales[j]);
        let xt = xs.transpose();
        let targets = DMatrix::from_fn(n, NUM_CLASSES, |i, k| {
            if labels[i].index() == k { 1.0 } else { 0.0 }
        });

        let mut weights = DMatrix::<f64>::zeros(FEATURE_COUNT, NUM_CLASSES);
        let mut bias = [0.0; NUM_CLASSES];
        let mut iterations = 0;

        for _ in 0..self.max_iter {
            iterations += 1;
            let scores = &xs * &weights;

            let mut residual = DMatrix::<f64>::zeros(n, NUM_CLASSES);
            for i in 0..n {
                let probs = softmax([
                    scores[(i, 0)] + bias[0],
                    scores[(i, 1)] + bias[1],
                    scores[(i, 2)] + bias[2],
                ]);
                for k in 0..NUM_CLASSES {
                    residual[(i, k)] = (probs[k] - targets[(i, k)]) / n as f64;
                }
            }

            let grad_w = &xt * &residual + &weights * lambda;
            let grad_b: [f64; NUM_CLASSES] = std::array::from_fn(|k| residual.column(k).sum());

            weights -= &grad_w * self.learning_rate;
            for k in 0..NUM_CLASSES {
                bias[k] -= self.learning_rate * grad_b[k];
            }

            let grad_b_max = grad_b.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));
            if grad_w.amax().max(grad_b_max) < self.tolerance {
                break;
            }
        }

        // Fold the standardization back into raw-scale weights
        let mut coefficients = [[0.0; FEATURE_COUNT]; NUM_CLASSES];
        let mut intercepts = bias;
        for k in 0..NUM_CLASSES {
            for j in 0..FEATURE_COUNT {
                coefficients[k][j] = weights[(j, k)] / scales[j];
                intercepts[k] -= weights[(j, k)] * means[j] / scales[j];
            }
        }

        let finite = coefficients.iter().flatten().chain(intercepts.iter()).all(|v| v.is_finite());
        if !finite {
            bail!("classifier diverged after {} iterations", iterations);
        }

        Ok(SoftmaxModel {
            coefficients,
            intercepts,
            iterations,
        })
    }
}

impl Classifier for SoftmaxModel {
    fn predict_proba(&self, features: &FeatureVector) -> [f64; NUM_CLASSES] {
        let x = features.values();
        let logits: [f64; NUM_CLASSES] = std::array::from_fn(|k| {
            self.intercepts[k]
                + self.coefficients[k].iter().zip(x.iter()).map(|(w, v)| w * v).sum::<f64>()
        });
        softmax(logits)
    }

    fn class_coefficients(&self) -> [[f64; FEATURE_COUNT]; NUM_CLASSES] {
        self.coefficients
    }
}
