//! Training progress shared between the training loop and its observers.
//!
//! Everything here sits behind one `parking_lot::Mutex`. The lock is taken for
//! a single read or update at a time, never across a training iteration.
use crate::error::{NetError, Result};
use crate::metrics::{self, ConfusionMatrix};
use crate::tensor::Vector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Training state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Idle,
    Training,
    Paused,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Training => write!(f, "training"),
            Status::Paused => write!(f, "paused"),
        }
    }
}

/// Counters and histories written by the training loop.
#[derive(Debug)]
pub struct Progress {
    pub status: Status,
    pub epoch: usize,
    /// One predicted class per processed training sample.
    pub predictions: Vec<usize>,
    /// One cross-entropy value per processed training sample.
    pub losses: Vec<f32>,
    /// Result of the most recent evaluation.
    pub confusion: ConfusionMatrix,
    /// Training split, shared with the network so observers can show the
    /// sample behind a prediction and score the prediction history.
    pub train_images: Arc<[Vector]>,
    pub train_labels: Arc<[usize]>,
    pub loss_window: usize,
}

impl Progress {
    pub fn new(classes: usize, loss_window: usize) -> Self {
        Self {
            status: Status::Idle,
            epoch: 0,
            predictions: Vec::new(),
            losses: Vec::new(),
            confusion: ConfusionMatrix::new(classes),
            train_images: Arc::from(Vec::new()),
            train_labels: Arc::from(Vec::new()),
            loss_window,
        }
    }

    /// Move to `to` if the current status is one of `from`.
    pub fn transition(&mut self, op: &'static str, from: &[Status], to: Status) -> Result<()> {
        if !from.contains(&self.status) {
            return Err(NetError::InvalidState {
                op,
                status: self.status,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Forget histories and epoch; status and dataset stay.
    pub fn reset(&mut self) {
        self.epoch = 0;
        self.predictions.clear();
        self.losses.clear();
        self.confusion.clear();
    }

    pub fn record(&mut self, predicted: usize, loss: f32) {
        self.predictions.push(predicted);
        self.losses.push(loss);
    }

    /// Total samples processed since training started.
    pub fn position(&self) -> usize {
        self.predictions.len()
    }

    pub fn position_in_epoch(&self) -> usize {
        match self.train_labels.len() {
            0 => 0,
            size => self.position() % size,
        }
    }

    pub fn mean_loss(&self) -> Option<f32> {
        metrics::trailing_mean(&self.losses, self.loss_window)
    }

    /// Accuracy of the predictions made since the current epoch began.
    ///
    /// `None` at an epoch boundary (no predictions yet in this epoch) and
    /// when no training data is loaded.
    pub fn train_precision(&self) -> Option<f32> {
        let size = self.train_labels.len();
        if size == 0 {
            return None;
        }
        let p = self.position();
        let start = (p / size) * size;
        metrics::accuracy(&self.predictions[start..p], &self.train_labels[..p - start])
    }

    /// Accuracy of the last evaluation, with the epsilon-guarded denominator.
    pub fn test_precision(&self) -> f32 {
        self.confusion.accuracy()
    }

    /// Prepared input and label of training sample `p`.
    pub fn train_sample(&self, p: usize) -> Option<(Vector, usize)> {
        Some((self.train_images.get(p)?.clone(), *self.train_labels.get(p)?))
    }

    pub fn recent_predictions(&self, n: usize) -> Vec<usize> {
        let start = self.predictions.len().saturating_sub(n);
        self.predictions[start..].to_vec()
    }

    pub fn snapshot(&self, recent: usize) -> Snapshot {
        Snapshot {
            status: self.status,
            position: self.position(),
            position_in_epoch: self.position_in_epoch(),
            dataset_len: self.train_labels.len(),
            epoch: self.epoch,
            mean_loss: self.mean_loss(),
            train_accuracy: self.train_precision(),
            test_accuracy: (self.confusion.total() > 0).then(|| self.test_precision()),
            recent_predictions: self.recent_predictions(recent),
        }
    }
}

/// Point-in-time view for a dashboard. `None` fields mean "no data yet".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: Status,
    pub position: usize,
    pub position_in_epoch: usize,
    pub dataset_len: usize,
    pub epoch: usize,
    pub mean_loss: Option<f32>,
    pub train_accuracy: Option<f32>,
    pub test_accuracy: Option<f32>,
    pub recent_predictions: Vec<usize>,
}

pub type SharedProgress = Arc<Mutex<Progress>>;

/// Read-only polling handle onto a network's progress.
#[derive(Debug, Clone)]
pub struct Monitor {
    progress: SharedProgress,
}

impl Monitor {
    pub fn new(progress: SharedProgress) -> Self {
        Self { progress }
    }

    pub fn status(&self) -> Status {
        self.progress.lock().status
    }

    pub fn snapshot(&self, recent: usize) -> Snapshot {
        self.progress.lock().snapshot(recent)
    }

    pub fn position(&self) -> usize {
        self.progress.lock().position()
    }

    pub fn epoch(&self) -> usize {
        self.progress.lock().epoch
    }

    pub fn loss_history(&self) -> Vec<f32> {
        self.progress.lock().losses.clone()
    }

    pub fn recent_predictions(&self, n: usize) -> Vec<usize> {
        self.progress.lock().recent_predictions(n)
    }

    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        self.progress.lock().confusion.clone()
    }

    pub fn train_sample(&self, p: usize) -> Option<(Vector, usize)> {
        self.progress.lock().train_sample(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_labels(labels: Vec<usize>) -> Progress {
        let mut p = Progress::new(10, 3);
        p.train_labels = Arc::from(labels);
        p
    }

    #[test]
    fn train_precision_undefined_at_epoch_boundary() {
        let mut p = with_labels(vec![1, 2, 3, 4]);
        assert_eq!(p.train_precision(), None);
        for pred in [1, 0, 3, 4] {
            p.record(pred, 0.0);
        }
        // position 4 is the start of epoch two
        assert_eq!(p.train_precision(), None);
        p.record(1, 0.0);
        p.record(0, 0.0);
        assert_eq!(p.train_precision(), Some(0.5));
        assert_eq!(p.position_in_epoch(), 2);
    }

    #[test]
    fn train_precision_mid_first_epoch() {
        let mut p = with_labels(vec![5, 5, 5, 5]);
        p.record(5, 0.0);
        p.record(4, 0.0);
        p.record(5, 0.0);
        let acc = p.train_precision().unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn train_sample_pairs_image_with_label() {
        let mut p = with_labels(vec![3, 8]);
        p.train_images = Arc::from(vec![Vector::zeros(2), Vector::from_vec(vec![1.0, 2.0])]);
        assert_eq!(p.train_sample(1), Some((Vector::from_vec(vec![1.0, 2.0]), 8)));
        assert_eq!(p.train_sample(2), None);
    }

    #[test]
    fn mean_loss_uses_window() {
        let mut p = with_labels(vec![0; 10]);
        assert_eq!(p.mean_loss(), None);
        for l in [10.0, 1.0, 2.0, 3.0] {
            p.record(0, l);
        }
        assert_eq!(p.mean_loss(), Some(2.0));
    }

    #[test]
    fn snapshot_reports_no_test_data_before_evaluation() {
        let mut p = with_labels(vec![0, 1]);
        let s = p.snapshot(5);
        assert_eq!(s.test_accuracy, None);
        assert!(s.recent_predictions.is_empty());
        p.confusion.record(1, 1);
        p.record(3, 0.5);
        let s = p.snapshot(5);
        assert!(s.test_accuracy.unwrap() > 0.99);
        assert_eq!(s.recent_predictions, vec![3]);
    }

    #[test]
    fn transitions_are_checked() {
        let mut p = with_labels(vec![0]);
        assert!(p.transition("pause", &[Status::Training], Status::Paused).is_err());
        assert_eq!(p.status, Status::Idle);
        p.transition("start", &[Status::Idle], Status::Training).unwrap();
        p.transition("pause", &[Status::Training], Status::Paused).unwrap();
        assert_eq!(p.status, Status::Paused);
    }

    #[test]
    fn recent_predictions_clamps_to_history() {
        let mut p = with_labels(vec![0]);
        p.record(1, 0.0);
        p.record(2, 0.0);
        assert_eq!(p.recent_predictions(16), vec![1, 2]);
        assert_eq!(p.recent_predictions(1), vec![2]);
    }
}
