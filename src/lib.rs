//! A small feed-forward network trainer for handwritten digits.
//!
//! - Dense layers with hand-written forward/backward passes (sigmoid or linear)
//! - Softmax cross-entropy output, mini-batch SGD with a fixed learning rate
//! - A pausable background training loop driven by a command channel
//! - Lock-guarded progress that a dashboard can poll while training runs
//! - IDX (MNIST) loaders and writers

pub mod activations;
pub mod config;
pub mod datasets;
pub mod error;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod network;
pub mod progress;
pub mod tensor;
pub mod trainer;
pub mod utils;

pub use activations::{Activation, ActivationKind, Linear, Sigmoid, Softmax};
pub use config::NetworkConfig;
pub use datasets::{load_mnist, MnistSplit};
pub use error::{NetError, Result};
pub use layers::{DenseLayer, Device, Layer};
pub use loss::{cross_entropy_deriv, cross_entropy_loss};
pub use metrics::ConfusionMatrix;
pub use network::{prepare_input, Network};
pub use progress::{Monitor, Snapshot, Status};
pub use tensor::{Matrix, Vector};
pub use trainer::{Command, Reply, Trainer};
pub use utils::{
    format_confusion, print_model_summary, render_digit, render_input, summarize_series,
};
