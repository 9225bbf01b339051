//! Metrics for evaluating classification performance.
use serde::{Deserialize, Serialize};

/// Added to the denominator of [`ConfusionMatrix::accuracy`].
pub const ACCURACY_EPSILON: f32 = 1e-6;

/// Square count table indexed as `[predicted][actual]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            counts: vec![0; classes * classes],
        }
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Count one sample; out-of-range classes are ignored.
    pub fn record(&mut self, predicted: usize, actual: usize) {
        if predicted < self.classes && actual < self.classes {
            self.counts[predicted * self.classes + actual] += 1;
        }
    }

    pub fn get(&self, predicted: usize, actual: usize) -> u64 {
        if predicted < self.classes && actual < self.classes {
            self.counts[predicted * self.classes + actual]
        } else {
            0
        }
    }

    /// Counts predicted as `predicted`, one entry per actual class.
    pub fn row(&self, predicted: usize) -> &[u64] {
        &self.counts[predicted * self.classes..(predicted + 1) * self.classes]
    }

    pub fn row_sum(&self, predicted: usize) -> u64 {
        self.row(predicted).iter().sum()
    }

    pub fn trace(&self) -> u64 {
        (0..self.classes).map(|i| self.get(i, i)).sum()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// `trace / (total + eps)`; 0 for an empty table.
    pub fn accuracy(&self) -> f32 {
        self.trace() as f32 / (self.total() as f32 + ACCURACY_EPSILON)
    }

    pub fn clear(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    /// Rows as nested vectors, for plotting.
    pub fn to_rows(&self) -> Vec<Vec<u64>> {
        (0..self.classes).map(|r| self.row(r).to_vec()).collect()
    }
}

/// Fraction of `predictions[i] == labels[i]` over the shorter of the two.
/// `None` when there is nothing to compare.
pub fn accuracy(predictions: &[usize], labels: &[usize]) -> Option<f32> {
    let n = predictions.len().min(labels.len());
    if n == 0 {
        return None;
    }
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| p == l)
        .count();
    Some(correct as f32 / n as f32)
}

/// Mean of the last `window` values, `None` if `values` is empty.
pub fn trailing_mean(values: &[f32], window: usize) -> Option<f32> {
    let start = values.len().saturating_sub(window);
    let tail = &values[start..];
    if tail.is_empty() {
        return None;
    }
    Some(tail.iter().sum::<f32>() / tail.len() as f32)
}
