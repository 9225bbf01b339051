//! Dense layer implementation with weights, bias, gradients and activation.
use crate::activations::ActivationKind;
use crate::error::{NetError, Result};
use crate::loss::{cross_entropy_deriv, cross_entropy_loss};
use crate::tensor::{dot, Matrix, Vector};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared interface of a trainable layer.
///
/// A layer caches the values of its last forward pass. The network copies
/// each layer's `output` into the next layer's input, and each layer's
/// `d_input` into the previous layer's `d_output`, so implementations only
/// have to agree on these buffers.
pub trait Layer: fmt::Debug + Send {
    fn in_size(&self) -> usize;
    fn out_size(&self) -> usize;
    fn parameter_count(&self) -> usize;

    /// Copy `values` into the cached input.
    fn set_input(&mut self, values: &[f32]) -> Result<()>;
    fn output(&self) -> &[f32];
    /// Copy the gradient of the loss with respect to `output`.
    fn set_d_output(&mut self, values: &[f32]) -> Result<()>;
    fn d_input(&self) -> &[f32];

    fn forward(&mut self) -> Result<()>;
    /// Accumulate parameter gradients from `d_output` and write `d_input`.
    fn backward(&mut self) -> Result<()>;
    fn step(&mut self, learning_rate: f32);
    fn zero_grad(&mut self);

    /// Seed backpropagation with the softmax cross-entropy gradient.
    fn init_back_prop(&mut self, label: usize) -> Result<()>;
    /// Cross-entropy of the cached output against `label`.
    fn loss(&self, label: usize) -> Result<f32>;
    /// Predicted class of the last forward pass.
    fn argmax(&self) -> usize;
}

/// Where the layer kernels run.
///
/// `Parallel` splits the per-unit work of forward and backward across the
/// rayon thread pool. Both devices produce the same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Parallel,
}

/// A fully-connected (dense) layer.
///
/// `input`/`output` hold the values of the last forward pass, `d_output` is
/// written by the next layer (or by [`Layer::init_back_prop`]) and
/// `d_input` is produced by [`Layer::backward`] for the previous layer.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub in_size: usize,
    pub out_size: usize,
    pub activation: ActivationKind,
    pub is_output: bool,
    pub device: Device,

    /// `out_size x in_size`
    pub weights: Matrix,
    pub bias: Vector,
    pub grad_weights: Matrix,
    pub grad_bias: Vector,

    pub input: Vector,
    pub output: Vector,
    pub d_output: Vector,
    pub d_input: Vector,
}

impl DenseLayer {
    /// Create a layer with weights and biases drawn from a standard normal.
    pub fn new<R: Rng + ?Sized>(
        in_size: usize,
        out_size: usize,
        activation: ActivationKind,
        is_output: bool,
        rng: &mut R,
    ) -> Self {
        let mut weights = Matrix::zeros(out_size, in_size);
        let mut bias = Vector::zeros(out_size);
        let w = weights.as_mut_slice();
        for i in 0..out_size {
            for x in &mut w[i * in_size..(i + 1) * in_size] {
                *x = rng.sample(StandardNormal);
            }
            bias[i] = rng.sample(StandardNormal);
        }
        Self {
            in_size,
            out_size,
            activation,
            is_output,
            device: Device::Cpu,
            weights,
            bias,
            grad_weights: Matrix::zeros(out_size, in_size),
            grad_bias: Vector::zeros(out_size),
            input: Vector::zeros(in_size),
            output: Vector::zeros(out_size),
            d_output: Vector::zeros(out_size),
            d_input: Vector::zeros(in_size),
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

impl Layer for DenseLayer {
    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn in_size(&self) -> usize {
        self.in_size
    }

    fn out_size(&self) -> usize {
        self.out_size
    }

    fn set_input(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.in_size {
            return Err(NetError::ShapeMismatch {
                op: "layer input",
                left: (self.in_size, 1),
                right: (values.len(), 1),
            });
        }
        if self.input.len() != values.len() {
            self.input = Vector::zeros(values.len());
        }
        self.input.as_mut_slice().copy_from_slice(values);
        Ok(())
    }

    fn output(&self) -> &[f32] {
        self.output.as_slice()
    }

    fn set_d_output(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.out_size {
            return Err(NetError::ShapeMismatch {
                op: "layer d_output",
                left: (self.out_size, 1),
                right: (values.len(), 1),
            });
        }
        if self.d_output.len() != values.len() {
            self.d_output = Vector::zeros(values.len());
        }
        self.d_output.as_mut_slice().copy_from_slice(values);
        Ok(())
    }

    fn d_input(&self) -> &[f32] {
        self.d_input.as_slice()
    }

    /// `output = act(W·input + b)`
    fn forward(&mut self) -> Result<()> {
        if self.input.len() != self.in_size {
            return Err(NetError::ShapeMismatch {
                op: "layer forward",
                left: self.weights.shape(),
                right: (self.input.len(), 1),
            });
        }
        let act = self.activation.function();
        let (w, b, x) = (&self.weights, &self.bias, self.input.as_slice());
        let unit = |(i, y): (usize, &mut f32)| *y = act.apply(dot(w.row(i), x) + b[i]);
        match self.device {
            Device::Cpu => self.output.as_mut_slice().iter_mut().enumerate().for_each(unit),
            Device::Parallel => self
                .output
                .as_mut_slice()
                .par_iter_mut()
                .enumerate()
                .for_each(unit),
        }
        Ok(())
    }

    /// Gradients are added to, not replaced; call [`Layer::zero_grad`]
    /// between optimizer steps.
    fn backward(&mut self) -> Result<()> {
        if self.d_output.len() != self.out_size {
            return Err(NetError::ShapeMismatch {
                op: "layer backward",
                left: (self.out_size, 1),
                right: (self.d_output.len(), 1),
            });
        }
        let act = self.activation.function();
        // delta_i = dOutput_i * act'(output_i)
        let delta: Vec<f32> = self
            .d_output
            .iter()
            .zip(self.output.iter())
            .map(|(&d, &y)| d * act.derivative_from_output(y))
            .collect();

        let in_size = self.in_size;
        let x = self.input.as_slice();
        let w = self.weights.as_slice();
        let accumulate = |(row, &d): (&mut [f32], &f32)| {
            for (g, &xj) in row.iter_mut().zip(x) {
                *g += d * xj;
            }
        };
        let column = |j: usize| -> f32 {
            delta
                .iter()
                .enumerate()
                .map(|(i, &d)| w[i * in_size + j] * d)
                .sum()
        };
        match self.device {
            Device::Cpu => {
                self.grad_weights
                    .as_mut_slice()
                    .chunks_mut(in_size)
                    .zip(&delta)
                    .for_each(accumulate);
                for (j, di) in self.d_input.as_mut_slice().iter_mut().enumerate() {
                    *di = column(j);
                }
            }
            Device::Parallel => {
                self.grad_weights
                    .as_mut_slice()
                    .par_chunks_mut(in_size)
                    .zip(delta.par_iter())
                    .for_each(accumulate);
                self.d_input
                    .as_mut_slice()
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(j, di)| *di = column(j));
            }
        }
        for (gb, &d) in self.grad_bias.as_mut_slice().iter_mut().zip(&delta) {
            *gb += d;
        }
        Ok(())
    }

    /// Plain SGD update: `W -= lr * dW`, `b -= lr * db`.
    fn step(&mut self, learning_rate: f32) {
        for (w, &g) in self
            .weights
            .as_mut_slice()
            .iter_mut()
            .zip(self.grad_weights.as_slice())
        {
            *w -= learning_rate * g;
        }
        for (b, &g) in self.bias.as_mut_slice().iter_mut().zip(self.grad_bias.iter()) {
            *b -= learning_rate * g;
        }
    }

    fn zero_grad(&mut self) {
        self.grad_weights.fill(0.0);
        self.grad_bias.fill(0.0);
    }

    fn init_back_prop(&mut self, label: usize) -> Result<()> {
        if !self.is_output {
            return Err(NetError::NotOutputLayer);
        }
        self.d_output = cross_entropy_deriv(self.output.as_slice(), label)?;
        Ok(())
    }

    fn loss(&self, label: usize) -> Result<f32> {
        cross_entropy_loss(self.output.as_slice(), label)
    }

    fn argmax(&self) -> usize {
        self.output.argmax().unwrap_or(0)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn output_layer(device: Device) -> DenseLayer {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        DenseLayer::new(4, 3, ActivationKind::Linear, true, &mut rng).with_device(device)
    }

    fn single_sample_loss(layer: &mut DenseLayer, label: usize) -> f32 {
        layer.forward().unwrap();
        layer.loss(label).unwrap()
    }

    #[test]
    fn forward_is_affine_for_linear_layer() {
        let mut layer = output_layer(Device::Cpu);
        layer.set_input(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        layer.forward().unwrap();
        for i in 0..3 {
            let expected = layer.weights[(i, 0)] + layer.bias[i];
            assert!((layer.output[i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn sigmoid_outputs_stay_in_unit_interval() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut layer = DenseLayer::new(5, 4, ActivationKind::Sigmoid, false, &mut rng);
        layer.set_input(&[3.0, -2.0, 0.5, 9.0, -7.0]).unwrap();
        layer.forward().unwrap();
        assert!(layer.output.iter().all(|&y| y > 0.0 && y < 1.0));
    }

    #[test]
    fn gradient_step_decreases_loss() {
        let mut layer = output_layer(Device::Cpu);
        layer.set_input(&[0.5, -1.0, 2.0, 0.25]).unwrap();
        let before = single_sample_loss(&mut layer, 1);
        layer.init_back_prop(1).unwrap();
        layer.backward().unwrap();
        layer.step(0.01);
        let after = single_sample_loss(&mut layer, 1);
        assert!(after < before, "{after} !< {before}");
    }

    #[test]
    fn backward_accumulates_until_zeroed() {
        let mut layer = output_layer(Device::Cpu);
        layer.set_input(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        layer.forward().unwrap();
        layer.init_back_prop(0).unwrap();
        layer.backward().unwrap();
        let once = layer.grad_weights.clone();
        layer.backward().unwrap();
        for (a, b) in layer.grad_weights.as_slice().iter().zip(once.as_slice()) {
            assert!((a - 2.0 * b).abs() < 1e-5);
        }
        layer.zero_grad();
        assert!(layer.grad_weights.as_slice().iter().all(|&g| g == 0.0));
        assert!(layer.grad_bias.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn step_with_zero_gradients_keeps_parameters() {
        let mut layer = output_layer(Device::Cpu);
        layer.zero_grad();
        let (w, b) = (layer.weights.clone(), layer.bias.clone());
        layer.step(0.5);
        assert_eq!(layer.weights, w);
        assert_eq!(layer.bias, b);
    }

    #[test]
    fn d_input_is_transposed_weights_times_delta() {
        let mut layer = output_layer(Device::Cpu);
        layer.set_input(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        layer.forward().unwrap();
        layer.d_output = Vector::from_vec(vec![1.0, 0.0, -1.0]);
        layer.backward().unwrap();
        for j in 0..4 {
            let expected = layer.weights[(0, j)] - layer.weights[(2, j)];
            assert!((layer.d_input[j] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn parallel_device_matches_cpu() {
        let mut cpu = output_layer(Device::Cpu);
        let mut par = output_layer(Device::Parallel);
        for layer in [&mut cpu, &mut par] {
            layer.set_input(&[0.3, -0.7, 1.1, 0.0]).unwrap();
            layer.forward().unwrap();
            layer.init_back_prop(2).unwrap();
            layer.backward().unwrap();
        }
        assert_eq!(cpu.output, par.output);
        assert_eq!(cpu.grad_weights, par.grad_weights);
        assert_eq!(cpu.d_input, par.d_input);
    }

    #[test]
    fn layers_chain_through_the_trait() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut stack: Vec<Box<dyn Layer>> = vec![
            Box::new(DenseLayer::new(4, 3, ActivationKind::Sigmoid, false, &mut rng)),
            Box::new(
                DenseLayer::new(3, 2, ActivationKind::Linear, true, &mut rng)
                    .with_device(Device::Parallel),
            ),
        ];
        stack[0].set_input(&[0.2, 0.4, -0.1, 1.0]).unwrap();
        stack[0].forward().unwrap();
        let hidden = stack[0].output().to_vec();
        stack[1].set_input(&hidden).unwrap();
        stack[1].forward().unwrap();
        stack[1].init_back_prop(1).unwrap();
        stack[1].backward().unwrap();
        let d = stack[1].d_input().to_vec();
        stack[0].set_d_output(&d).unwrap();
        stack[0].backward().unwrap();

        assert_eq!(stack[0].d_input().len(), 4);
        assert!(stack[0].set_d_output(&[1.0]).is_err());
        assert!(stack[1].argmax() < 2);
        let params: usize = stack.iter().map(|l| l.parameter_count()).sum();
        assert_eq!(params, 15 + 8);
    }

    #[test]
    fn hidden_layer_cannot_seed_backprop() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut hidden = DenseLayer::new(2, 2, ActivationKind::Sigmoid, false, &mut rng);
        assert!(matches!(hidden.init_back_prop(0), Err(NetError::NotOutputLayer)));
    }

    #[test]
    fn input_length_is_checked() {
        let mut layer = output_layer(Device::Cpu);
        assert!(layer.set_input(&[1.0, 2.0]).is_err());
        layer.input = Vector::zeros(2);
        assert!(layer.forward().is_err());
    }
}
