//! Error types shared by the numeric containers, layers and the network.
use crate::progress::Status;
use thiserror::Error;

/// Errors raised by the training engine.
#[derive(Debug, Error)]
pub enum NetError {
    /// Element access past the end of a vector or matrix dimension.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Operands of an arithmetic operation have incompatible shapes.
    #[error("shape mismatch in {op}: {left:?} vs {right:?}")]
    ShapeMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    /// A class label outside `0..classes`.
    #[error("label {label} is not a valid class (expected < {classes})")]
    InvalidLabel { label: usize, classes: usize },

    /// Loss gradient requested from a layer that is not the output layer.
    #[error("backpropagation can only be initialised on the output layer")]
    NotOutputLayer,

    #[error("{0} dataset is empty")]
    EmptyDataset(&'static str),

    #[error("dataset has {images} images but {labels} labels")]
    DataLengthMismatch { images: usize, labels: usize },

    /// A control command that is not allowed from the current status.
    #[error("cannot {op} while {status}")]
    InvalidState { op: &'static str, status: Status },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The background worker terminated unexpectedly.
    #[error("training worker is no longer running")]
    WorkerGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, NetError>;
