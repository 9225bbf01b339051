//! Activation functions used by the dense layers.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trait for element-wise activation functions.
///
/// Layers cache post-activation outputs, so the derivative is expressed in
/// terms of the activated value rather than the pre-activation input.
pub trait Activation: fmt::Debug + Send + Sync {
    fn apply(&self, x: f32) -> f32;
    /// Derivative evaluated at `y = apply(x)`.
    fn derivative_from_output(&self, y: f32) -> f32;
}

/// Sigmoid: 1 / (1 + exp(-x))
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Activation for Sigmoid {
    fn apply(&self, x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }
    fn derivative_from_output(&self, y: f32) -> f32 {
        y * (1.0 - y)
    }
}

/// Linear: identity
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl Activation for Linear {
    fn apply(&self, x: f32) -> f32 {
        x
    }
    fn derivative_from_output(&self, _y: f32) -> f32 {
        1.0
    }
}

/// Softmax (vector-only)
#[derive(Debug, Clone, Copy, Default)]
pub struct Softmax;

impl Softmax {
    /// Numerically stable softmax; shifts by the maximum before exponentiating.
    pub fn apply_vec(&self, x: &[f32]) -> Vec<f32> {
        if x.is_empty() {
            return Vec::new();
        }
        let max = x.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let exps: Vec<f32> = x.iter().map(|&xi| (xi - max).exp()).collect();
        let exp_sum: f32 = exps.iter().sum();
        if !exp_sum.is_finite() || exp_sum <= 0.0 {
            // Fallback to uniform distribution to avoid NaNs
            let n = x.len() as f32;
            return vec![1.0 / n; x.len()];
        }
        exps.into_iter().map(|e| e / exp_sum).collect()
    }

    /// `ln(sum(exp(x)))`, computed without overflow.
    pub fn log_sum_exp(&self, x: &[f32]) -> f32 {
        let max = x.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        if !max.is_finite() {
            return max;
        }
        max + x.iter().map(|&xi| (xi - max).exp()).sum::<f32>().ln()
    }
}

/// Serializable activation kinds; the only two a dense layer supports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    #[default]
    Sigmoid,
    Linear,
}

impl ActivationKind {
    pub fn function(self) -> &'static dyn Activation {
        match self {
            ActivationKind::Sigmoid => &Sigmoid,
            ActivationKind::Linear => &Linear,
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationKind::Sigmoid => write!(f, "sigmoid"),
            ActivationKind::Linear => write!(f, "linear"),
        }
    }
}
