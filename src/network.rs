//! Feed-forward network: layers, datasets, the training loop and evaluation.
use crate::activations::ActivationKind;
use crate::config::NetworkConfig;
use crate::error::{NetError, Result};
use crate::layers::{DenseLayer, Layer};
use crate::metrics::ConfusionMatrix;
use crate::progress::{Monitor, Progress, SharedProgress, Snapshot, Status};
use crate::tensor::{Matrix, Vector};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

/// Mean of MNIST pixel intensities scaled to `[0, 1]`.
pub const PIXEL_MEAN: f32 = 0.1307;
/// Standard deviation of MNIST pixel intensities scaled to `[0, 1]`.
pub const PIXEL_STD: f32 = 0.3081;

/// Flatten a raw 0-255 image and standardise it.
pub fn prepare_input(image: &Matrix) -> Vector {
    Vector::from_vec(
        image
            .as_slice()
            .iter()
            .map(|&px| (px / 255.0 - PIXEL_MEAN) / PIXEL_STD)
            .collect(),
    )
}

fn build_layers(config: &NetworkConfig, rng: &mut ChaCha8Rng) -> Vec<DenseLayer> {
    let last = config.layer_sizes.len() - 2;
    config
        .layer_sizes
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let activation = if i == last {
                ActivationKind::Linear
            } else {
                config.hidden_activation
            };
            DenseLayer::new(pair[0], pair[1], activation, i == last, &mut *rng)
                .with_device(config.device)
        })
        .collect()
}

/// Run every layer in order, feeding each output into the next input.
fn propagate<L: Layer>(layers: &mut [L], input: &Vector) -> Result<()> {
    if let Some(first) = layers.first_mut() {
        first.set_input(input.as_slice())?;
    }
    for i in 0..layers.len() {
        layers[i].forward()?;
        if i + 1 < layers.len() {
            let (done, rest) = layers.split_at_mut(i + 1);
            rest[0].set_input(done[i].output())?;
        }
    }
    Ok(())
}

/// Seed the output gradient and walk the layers in reverse.
fn backpropagate<L: Layer>(layers: &mut [L], label: usize) -> Result<()> {
    let Some(last) = layers.last_mut() else {
        return Ok(());
    };
    last.init_back_prop(label)?;
    for i in (0..layers.len()).rev() {
        layers[i].backward()?;
        if i > 0 {
            let (before, from) = layers.split_at_mut(i);
            before[i - 1].set_d_output(from[0].d_input())?;
        }
    }
    Ok(())
}

/// Dense feed-forward classifier with its datasets and training state.
///
/// The layers are only ever touched by whoever owns the `Network`. Observers
/// on other threads go through [`Network::monitor`].
#[derive(Debug)]
pub struct Network {
    /// Ordered list of dense layers from input to output.
    pub layers: Vec<DenseLayer>,
    config: NetworkConfig,
    rng: ChaCha8Rng,
    images: Arc<[Vector]>,
    labels: Arc<[usize]>,
    test_images: Vec<Vector>,
    test_labels: Vec<usize>,
    test_order: Vec<usize>,
    progress: SharedProgress,
}

impl Network {
    /// Build a network with freshly drawn parameters.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let layers = build_layers(&config, &mut rng);
        let progress = Progress::new(config.classes(), config.loss_window);
        Ok(Self {
            layers,
            rng,
            images: Arc::from(Vec::new()),
            labels: Arc::from(Vec::new()),
            test_images: Vec::new(),
            test_labels: Vec::new(),
            test_order: Vec::new(),
            progress: Arc::new(Mutex::new(progress)),
            config,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn learning_rate(&self) -> f32 {
        self.config.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) -> Result<()> {
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(NetError::InvalidConfig(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        self.config.learning_rate = learning_rate;
        Ok(())
    }

    /// Redraw every weight and bias.
    pub fn init_layers(&mut self) {
        self.layers = build_layers(&self.config, &mut self.rng);
    }

    fn output_layer(&self) -> &DenseLayer {
        self.layers.last().expect("No layers in Network")
    }

    fn check_split(&self, which: &'static str, inputs: &[Vector], labels: &[usize]) -> Result<()> {
        if inputs.is_empty() {
            return Err(NetError::EmptyDataset(which));
        }
        if inputs.len() != labels.len() {
            return Err(NetError::DataLengthMismatch {
                images: inputs.len(),
                labels: labels.len(),
            });
        }
        let (input_size, classes) = (self.config.input_size(), self.config.classes());
        if let Some(bad) = inputs.iter().find(|v| v.len() != input_size) {
            return Err(NetError::ShapeMismatch {
                op: "dataset input",
                left: (input_size, 1),
                right: (bad.len(), 1),
            });
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= classes) {
            return Err(NetError::InvalidLabel { label, classes });
        }
        Ok(())
    }

    /// Normalise raw images and install them as the training split.
    pub fn set_train_data(&mut self, images: &[Matrix], labels: &[u8]) -> Result<()> {
        let inputs = images.iter().map(prepare_input).collect();
        self.set_train_vectors(inputs, labels.iter().map(|&l| l as usize).collect())
    }

    /// Install already-prepared input vectors as the training split.
    ///
    /// Only allowed while idle, since the training position indexes into it.
    pub fn set_train_vectors(&mut self, inputs: Vec<Vector>, labels: Vec<usize>) -> Result<()> {
        let status = self.status();
        if status != Status::Idle {
            return Err(NetError::InvalidState {
                op: "replace training data",
                status,
            });
        }
        self.check_split("training", &inputs, &labels)?;
        self.images = Arc::from(inputs);
        self.labels = Arc::from(labels);
        {
            let mut progress = self.progress.lock();
            progress.train_images = Arc::clone(&self.images);
            progress.train_labels = Arc::clone(&self.labels);
        }
        debug!("training split set: {} samples", self.images.len());
        Ok(())
    }

    /// Normalise raw images and install them as the test split.
    pub fn set_test_data(&mut self, images: &[Matrix], labels: &[u8]) -> Result<()> {
        let inputs = images.iter().map(prepare_input).collect();
        self.set_test_vectors(inputs, labels.iter().map(|&l| l as usize).collect())
    }

    /// Install prepared test vectors and reset the evaluation order.
    pub fn set_test_vectors(&mut self, inputs: Vec<Vector>, labels: Vec<usize>) -> Result<()> {
        self.check_split("test", &inputs, &labels)?;
        self.test_order = (0..inputs.len()).collect();
        self.test_images = inputs;
        self.test_labels = labels;
        debug!("test split set: {} samples", self.test_images.len());
        Ok(())
    }

    pub fn train_len(&self) -> usize {
        self.images.len()
    }

    pub fn test_len(&self) -> usize {
        self.test_images.len()
    }

    /// Prepared input and label of training sample `p`.
    pub fn train_sample(&self, p: usize) -> Option<(&Vector, usize)> {
        Some((self.images.get(p)?, self.labels[p]))
    }

    /// Prepared input and label of the `p`-th test sample in the current
    /// evaluation order, the one [`Network::predict`] scores.
    pub fn test_sample(&self, p: usize) -> Option<(&Vector, usize)> {
        let idx = *self.test_order.get(p)?;
        Some((&self.test_images[idx], self.test_labels[idx]))
    }

    /// The sample behind position `p` of whatever the network is busy with:
    /// the training split while training or paused, the evaluation order
    /// otherwise.
    pub fn sample(&self, p: usize) -> Option<(&Vector, usize)> {
        match self.status() {
            Status::Training | Status::Paused => self.train_sample(p),
            Status::Idle => self.test_sample(p),
        }
    }

    /// Forward pass on training sample `p`.
    pub fn forward(&mut self, p: usize) -> Result<()> {
        let input = self.images.get(p).ok_or(NetError::IndexOutOfRange {
            index: p,
            len: self.images.len(),
        })?;
        propagate(&mut self.layers, input)
    }

    /// Forward pass on an arbitrary prepared input.
    pub fn forward_vector(&mut self, input: &Vector) -> Result<()> {
        propagate(&mut self.layers, input)
    }

    /// Backward pass for the last forward, accumulating gradients.
    pub fn backward(&mut self, label: usize) -> Result<()> {
        backpropagate(&mut self.layers, label)
    }

    pub fn step(&mut self) {
        let lr = self.config.learning_rate;
        for layer in &mut self.layers {
            layer.step(lr);
        }
    }

    pub fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }

    /// Predicted class of the last forward pass.
    pub fn output_argmax(&self) -> usize {
        self.output_layer().argmax()
    }

    /// Cross-entropy of the last forward pass against `label`.
    pub fn output_loss(&self, label: usize) -> Result<f32> {
        self.output_layer().loss(label)
    }

    /// Inference on an arbitrary prepared input.
    pub fn predict_vector(&mut self, input: &Vector) -> Result<usize> {
        self.forward_vector(input)?;
        Ok(self.output_argmax())
    }

    /// Inference on the `p`-th test sample of the current evaluation order.
    pub fn predict(&mut self, p: usize) -> Result<usize> {
        let idx = *self.test_order.get(p).ok_or(NetError::IndexOutOfRange {
            index: p,
            len: self.test_order.len(),
        })?;
        propagate(&mut self.layers, &self.test_images[idx])?;
        Ok(self.output_argmax())
    }

    /// Score the first `n` test samples after a full reshuffle of the test
    /// order. Replaces the confusion matrix and returns the accuracy.
    ///
    /// Gradients and parameters are left untouched.
    pub fn test(&mut self, n: usize) -> Result<f32> {
        let n = n.min(self.test_images.len());
        if n == 0 {
            return Err(NetError::EmptyDataset("test"));
        }
        self.test_order.shuffle(&mut self.rng);
        let mut confusion = ConfusionMatrix::new(self.config.classes());
        let mut correct = 0usize;
        for i in 0..n {
            let predicted = self.predict(i)?;
            let actual = self.test_labels[self.test_order[i]];
            if predicted == actual {
                correct += 1;
            }
            confusion.record(predicted, actual);
        }
        let accuracy = correct as f32 / n as f32;
        self.progress.lock().confusion = confusion;
        info!("evaluated {n} test samples: accuracy {accuracy:.4}");
        Ok(accuracy)
    }

    /// One iteration of the training loop for global sample number `n`.
    fn process_sample(&mut self, n: usize) -> Result<()> {
        let size = self.images.len();
        if size == 0 {
            return Err(NetError::EmptyDataset("training"));
        }
        let p = n % size;
        if n > 0 && p == 0 {
            let epoch = {
                let mut progress = self.progress.lock();
                progress.epoch += 1;
                progress.epoch
            };
            info!("epoch {} started", epoch + 1);
        }

        let label = self.labels[p];
        propagate(&mut self.layers, &self.images[p])?;
        backpropagate(&mut self.layers, label)?;
        let predicted = self.output_argmax();
        let loss = self.output_loss(label)?;
        self.progress.lock().record(predicted, loss);

        if n > 0 && n % self.config.batch_size == 0 {
            self.step();
            self.zero_grad();
        }
        if n > 0 && n % self.config.eval_interval == 0 {
            if self.test_images.is_empty() {
                debug!("skipping evaluation at sample {n}: no test data");
            } else {
                self.test(self.config.eval_samples)?;
            }
        }
        Ok(())
    }

    /// Run the training loop until the status leaves `Training`.
    ///
    /// Stop and pause requests are seen between samples. On error the status
    /// falls back to idle.
    pub fn train(&mut self) -> Result<()> {
        let mut n = self.position();
        info!("training loop entered at sample {n}");
        while self.status() == Status::Training {
            if let Err(e) = self.process_sample(n) {
                warn!("training loop aborted at sample {n}: {e}");
                self.progress.lock().status = Status::Idle;
                return Err(e);
            }
            n += 1;
        }
        info!("training loop left at sample {n} ({})", self.status());
        Ok(())
    }

    /// Process exactly `samples` iterations of the loop body from the
    /// current position, regardless of status.
    pub fn run_for(&mut self, samples: usize) -> Result<()> {
        let start = self.position();
        for n in start..start + samples {
            self.process_sample(n)?;
        }
        Ok(())
    }

    /// `idle -> training`: fresh parameters, cleared histories.
    ///
    /// Only flips the state; [`Network::train`] drives the loop.
    pub fn start_training(&mut self) -> Result<()> {
        if self.images.is_empty() {
            return Err(NetError::EmptyDataset("training"));
        }
        {
            let mut progress = self.progress.lock();
            progress.transition("start training", &[Status::Idle], Status::Training)?;
            progress.reset();
        }
        self.init_layers();
        self.zero_grad();
        info!("training started: {}", self);
        Ok(())
    }

    /// `training -> paused`; position, epoch and parameters are kept.
    pub fn pause_training(&self) -> Result<()> {
        pause(&self.progress)
    }

    /// `paused -> training` without touching the parameters.
    pub fn resume_training(&self) -> Result<()> {
        self.progress
            .lock()
            .transition("resume training", &[Status::Paused], Status::Training)?;
        info!("training resumed");
        Ok(())
    }

    /// `training | paused -> idle`.
    pub fn stop_training(&self) -> Result<()> {
        stop(&self.progress)
    }

    pub fn status(&self) -> Status {
        self.progress.lock().status
    }

    pub fn is_training(&self) -> bool {
        self.status() == Status::Training
    }

    pub fn is_paused(&self) -> bool {
        self.status() == Status::Paused
    }

    pub fn monitor(&self) -> Monitor {
        Monitor::new(Arc::clone(&self.progress))
    }

    pub(crate) fn shared_progress(&self) -> SharedProgress {
        Arc::clone(&self.progress)
    }

    pub fn snapshot(&self, recent: usize) -> Snapshot {
        self.progress.lock().snapshot(recent)
    }

    /// Samples processed since training started.
    pub fn position(&self) -> usize {
        self.progress.lock().position()
    }

    pub fn position_in_epoch(&self) -> usize {
        self.progress.lock().position_in_epoch()
    }

    pub fn epoch(&self) -> usize {
        self.progress.lock().epoch
    }

    pub fn mean_loss(&self) -> Option<f32> {
        self.progress.lock().mean_loss()
    }

    pub fn loss_history(&self) -> Vec<f32> {
        self.progress.lock().losses.clone()
    }

    /// The last `n` predicted classes (fewer if the history is shorter).
    pub fn recent_predictions(&self, n: usize) -> Vec<usize> {
        self.progress.lock().recent_predictions(n)
    }

    pub fn train_precision(&self) -> Option<f32> {
        self.progress.lock().train_precision()
    }

    pub fn test_precision(&self) -> f32 {
        self.progress.lock().test_precision()
    }

    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        self.progress.lock().confusion.clone()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }

    /// Save parameters as gzipped JSON.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dto = ModelDto::from_network(self);
        let mut enc = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
        serde_json::to_writer(&mut enc, &dto)?;
        enc.finish()?;
        info!("saved model to {}", path.display());
        Ok(())
    }

    /// Load parameters saved by [`Network::save_model`]. The topology on disk
    /// must match this network's.
    pub fn load_parameters<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dec = GzDecoder::new(BufReader::new(File::open(path)?));
        let dto: ModelDto = serde_json::from_reader(dec)?;
        if dto.layer_sizes != self.config.layer_sizes {
            return Err(NetError::InvalidData(format!(
                "model topology {:?} does not match {:?}",
                dto.layer_sizes, self.config.layer_sizes
            )));
        }
        if dto.layers.len() != self.layers.len() {
            return Err(NetError::InvalidData(format!(
                "model has {} layers, expected {}",
                dto.layers.len(),
                self.layers.len()
            )));
        }
        // decode everything first so a bad file leaves the network untouched
        let mut decoded = Vec::with_capacity(self.layers.len());
        for (i, (layer, ld)) in self.layers.iter().zip(dto.layers).enumerate() {
            if (ld.input_size, ld.output_size) != (layer.in_size, layer.out_size) {
                return Err(NetError::InvalidData(format!(
                    "stored layer {i} is {}x{}, expected {}x{}",
                    ld.output_size, ld.input_size, layer.out_size, layer.in_size
                )));
            }
            if ld.activation != layer.activation {
                return Err(NetError::InvalidData(format!(
                    "stored layer {i} uses {} activation, expected {}",
                    ld.activation, layer.activation
                )));
            }
            if ld.bias.len() != layer.out_size {
                return Err(NetError::InvalidData(format!(
                    "stored layer {i} has {} biases, expected {}",
                    ld.bias.len(),
                    layer.out_size
                )));
            }
            let weights = Matrix::from_vec(ld.output_size, ld.input_size, ld.weights)
                .map_err(|e| NetError::InvalidData(format!("stored layer {i}: {e}")))?;
            decoded.push((weights, Vector::from_vec(ld.bias)));
        }
        for (layer, (weights, bias)) in self.layers.iter_mut().zip(decoded) {
            layer.weights = weights;
            layer.bias = bias;
        }
        info!("loaded model from {}", path.display());
        Ok(())
    }
}

pub(crate) fn pause(progress: &Mutex<Progress>) -> Result<()> {
    progress
        .lock()
        .transition("pause training", &[Status::Training], Status::Paused)?;
    info!("training pause requested");
    Ok(())
}

pub(crate) fn stop(progress: &Mutex<Progress>) -> Result<()> {
    progress.lock().transition(
        "stop training",
        &[Status::Training, Status::Paused],
        Status::Idle,
    )?;
    info!("training stop requested");
    Ok(())
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Network: {:?} ({} hidden, {} parameters, lr {})",
            self.config.layer_sizes,
            self.config.hidden_activation,
            self.parameter_count(),
            self.config.learning_rate
        )
    }
}

// ============ Persistence DTOs ============

#[derive(Debug, Serialize, Deserialize)]
struct LayerDto {
    input_size: usize,
    output_size: usize,
    activation: ActivationKind,
    weights: Vec<f32>, // row-major [output_size][input_size]
    bias: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelDto {
    layer_sizes: Vec<usize>,
    layers: Vec<LayerDto>,
}

impl ModelDto {
    fn from_network(net: &Network) -> Self {
        fn sanitize(v: &[f32]) -> Vec<f32> {
            v.iter().map(|&x| if x.is_finite() { x } else { 0.0 }).collect()
        }
        Self {
            layer_sizes: net.config.layer_sizes.clone(),
            layers: net
                .layers
                .iter()
                .map(|layer| LayerDto {
                    input_size: layer.in_size,
                    output_size: layer.out_size,
                    activation: layer.activation,
                    weights: sanitize(layer.weights.as_slice()),
                    bias: sanitize(layer.bias.as_slice()),
                })
                .collect(),
        }
    }
}
