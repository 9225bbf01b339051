//! Network and training-loop configuration.
use crate::activations::ActivationKind;
use crate::error::{NetError, Result};
use crate::layers::Device;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MNIST_IMAGE_SIDE: usize = 28;
pub const MNIST_CLASSES: usize = 10;

/// Topology and schedule of a [`crate::Network`].
///
/// The last entry of `layer_sizes` is the number of classes. Hidden layers use
/// `hidden_activation`; the output layer is always linear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub layer_sizes: Vec<usize>,
    pub hidden_activation: ActivationKind,
    pub learning_rate: f32,
    /// Samples whose gradients are accumulated per SGD step.
    pub batch_size: usize,
    /// Run an evaluation every this many training samples.
    pub eval_interval: usize,
    /// Test samples scored per evaluation.
    pub eval_samples: usize,
    /// Trailing window for the reported mean loss.
    pub loss_window: usize,
    /// Fixed seed for weights and shuffling; `None` draws from the OS.
    pub seed: Option<u64>,
    pub device: Device,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            layer_sizes: vec![MNIST_IMAGE_SIDE * MNIST_IMAGE_SIDE, 64, 64, MNIST_CLASSES],
            hidden_activation: ActivationKind::Sigmoid,
            learning_rate: 0.01,
            batch_size: 50,
            eval_interval: 10_000,
            eval_samples: 10_000,
            loss_window: 1000,
            seed: None,
            device: Device::Cpu,
        }
    }
}

impl NetworkConfig {
    /// Read a JSON config; missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn input_size(&self) -> usize {
        self.layer_sizes.first().copied().unwrap_or(0)
    }

    pub fn classes(&self) -> usize {
        self.layer_sizes.last().copied().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(NetError::InvalidConfig(msg.to_string()));
        if self.layer_sizes.len() < 2 {
            return invalid("need at least an input and an output size");
        }
        if self.layer_sizes.contains(&0) {
            return invalid("layer sizes must be non-zero");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid("learning rate must be positive");
        }
        if self.batch_size == 0 || self.eval_interval == 0 || self.loss_window == 0 {
            return invalid("batch size, eval interval and loss window must be non-zero");
        }
        Ok(())
    }
}
