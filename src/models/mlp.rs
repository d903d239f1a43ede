/// Multi-layer perceptron with hand-written backpropagation
///
/// Parameters are plain F64 tensors laid out as `[W1, b1, W2, b2, ...]`
/// with `Wi: [in, out]` and `bi: [out]`. A two-parameter network is the
/// log-linear classifier. Gradients come from an explicit backward pass,
/// which is what `gradcheck` is meant to validate.
use candle_core::{DType, Device, Tensor, D};

use crate::layers::activations::{softmax, Activation};
use crate::layers::linear::xavier_bound;
use crate::{Result, TaggerError};

#[derive(Debug, Clone)]
pub struct Mlp {
    params: Vec<Tensor>,
    activation: Activation,
}

/// Values kept from the forward pass for the backward pass
struct ForwardCache {
    /// Input row to each layer, `[1, in]`
    layer_inputs: Vec<Tensor>,
    /// Pre-activation of each hidden layer, `[1, out]`
    pre_activations: Vec<Tensor>,
    /// Output probabilities, `[1, classes]`
    probs: Tensor,
}

impl Mlp {
    /// Create a network for `dims = [input, hidden..., output]`
    ///
    /// Weights use Xavier-uniform initialization and biases start at zero;
    /// `tanh` sits between consecutive layers.
    pub fn new(dims: &[usize], device: &Device) -> Result<Self> {
        if dims.len() < 2 {
            return Err(TaggerError::Config(format!(
                "an MLP needs at least input and output dims, got {:?}",
                dims
            )));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(TaggerError::Config(format!("MLP dims must be > 0, got {:?}", dims)));
        }

        let mut params = Vec::with_capacity(2 * (dims.len() - 1));
        for pair in dims.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let bound = xavier_bound(fan_in, fan_out);
            params.push(Tensor::rand(-bound, bound, (fan_in, fan_out), device)?);
            params.push(Tensor::zeros(fan_out, DType::F64, device)?);
        }

        Ok(Self {
            params,
            activation: Activation::Tanh,
        })
    }

    /// Single-layer (softmax regression) classifier
    pub fn log_linear(in_dim: usize, out_dim: usize, device: &Device) -> Result<Self> {
        Self::new(&[in_dim, out_dim], device)
    }

    /// Build from an existing parameter list
    pub fn from_params(params: Vec<Tensor>, activation: Activation) -> Result<Self> {
        if params.len() < 2 || params.len() % 2 != 0 {
            return Err(TaggerError::Model(format!(
                "expected an even, non-zero number of parameters, got {}",
                params.len()
            )));
        }
        for pair in params.chunks(2) {
            let (w, b) = (&pair[0], &pair[1]);
            if w.rank() != 2 || b.dims() != [w.dims()[1]] {
                return Err(TaggerError::ShapeMismatch {
                    expected: vec![w.dims().last().copied().unwrap_or(0)],
                    actual: b.dims().to_vec(),
                });
            }
        }
        for pair in params.windows(3).step_by(2) {
            // W_i's output must feed W_{i+1}'s input
            let (w, next_w) = (&pair[0], &pair[2]);
            if w.dims()[1] != next_w.dims()[0] {
                return Err(TaggerError::ShapeMismatch {
                    expected: vec![w.dims()[1], next_w.dims()[1]],
                    actual: next_w.dims().to_vec(),
                });
            }
        }

        let params = params
            .into_iter()
            .map(|p| p.to_dtype(DType::F64))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { params, activation })
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn params(&self) -> &[Tensor] {
        &self.params
    }

    pub fn num_layers(&self) -> usize {
        self.params.len() / 2
    }

    pub fn input_dim(&self) -> usize {
        self.params[0].dims()[0]
    }

    pub fn output_dim(&self) -> usize {
        self.params[self.params.len() - 1].dims()[0]
    }

    /// Replace all parameters, keeping shapes
    pub fn set_params(&mut self, params: Vec<Tensor>) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(TaggerError::Model(format!(
                "expected {} parameters, got {}",
                self.params.len(),
                params.len()
            )));
        }
        for (old, new) in self.params.iter().zip(params.iter()) {
            if old.dims() != new.dims() {
                return Err(TaggerError::ShapeMismatch {
                    expected: old.dims().to_vec(),
                    actual: new.dims().to_vec(),
                });
            }
        }
        self.params = params;
        Ok(())
    }

    /// One plain gradient-descent update: `p -= learning_rate * g`
    pub fn sgd_step(&mut self, grads: &[Tensor], learning_rate: f64) -> Result<()> {
        let updated = self
            .params
            .iter()
            .zip(grads.iter())
            .map(|(p, g)| p.sub(&(g * learning_rate)?))
            .collect::<candle_core::Result<Vec<_>>>()?;
        self.set_params(updated)
    }

    fn forward(&self, x: &Tensor) -> Result<ForwardCache> {
        if x.dims() != [self.input_dim()] {
            return Err(TaggerError::ShapeMismatch {
                expected: vec![self.input_dim()],
                actual: x.dims().to_vec(),
            });
        }

        let mut h = x.to_dtype(DType::F64)?.unsqueeze(0)?;
        let mut layer_inputs = Vec::with_capacity(self.num_layers());
        let mut pre_activations = Vec::with_capacity(self.num_layers() - 1);

        let last = self.num_layers() - 1;
        for (layer, pair) in self.params.chunks(2).enumerate() {
            let z = h.matmul(&pair[0])?.broadcast_add(&pair[1])?;
            layer_inputs.push(h);
            if layer == last {
                h = z;
            } else {
                h = self.activation.forward(&z)?;
                pre_activations.push(z);
            }
        }

        Ok(ForwardCache {
            layer_inputs,
            pre_activations,
            probs: softmax(&h)?,
        })
    }

    /// Class probabilities for a single feature vector
    pub fn classifier_output(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.forward(x)?.probs.squeeze(0)?)
    }

    /// Most probable class
    pub fn predict(&self, x: &Tensor) -> Result<usize> {
        let probs = self.classifier_output(x)?;
        Ok(probs.argmax(D::Minus1)?.to_scalar::<u32>()? as usize)
    }

    /// Cross-entropy loss for label `y` and the gradient of every parameter
    ///
    /// Gradients are returned in parameter order: `[gW1, gb1, gW2, gb2, ...]`.
    pub fn loss_and_gradients(&self, x: &Tensor, y: usize) -> Result<(f64, Vec<Tensor>)> {
        let classes = self.output_dim();
        if y >= classes {
            return Err(TaggerError::Model(format!(
                "label {} out of range for {} classes",
                y, classes
            )));
        }

        let cache = self.forward(x)?;
        let probs = cache.probs.squeeze(0)?.to_vec1::<f64>()?;
        let loss = -probs[y].ln();

        let mut one_hot = vec![0f64; classes];
        one_hot[y] = 1.0;
        let one_hot = Tensor::from_vec(one_hot, (1, classes), cache.probs.device())?;

        // dL/dz for softmax + cross-entropy
        let mut g = cache.probs.sub(&one_hot)?;
        let mut grads = Vec::with_capacity(self.params.len());
        for layer in (0..self.num_layers()).rev() {
            let w = &self.params[2 * layer];
            let input = &cache.layer_inputs[layer];

            let gw = input.t()?.contiguous()?.matmul(&g)?;
            let gb = g.squeeze(0)?;
            if layer > 0 {
                let upstream = g.matmul(&w.t()?.contiguous()?)?;
                let local = self.activation.derivative(&cache.pre_activations[layer - 1])?;
                g = upstream.mul(&local)?;
            }
            grads.push(gb);
            grads.push(gw);
        }
        grads.reverse();

        Ok((loss, grads))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck::{GradCheckSuite, GradientChecker};

    fn check_all_params(mlp: &Mlp, x: &Tensor, y: usize) -> Result<GradCheckSuite> {
        let mut suite = GradCheckSuite::new(GradientChecker::default());
        for i in 0..mlp.params().len() {
            let f = |candidate: &Tensor| -> Result<(f64, Tensor)> {
                let mut params = mlp.params().to_vec();
                params[i] = candidate.clone();
                let (loss, grads) = Mlp::from_params(params, Activation::Tanh)?.loss_and_gradients(x, y)?;
                Ok((loss, grads[i].clone()))
            };
            suite.check(&format!("param {}", i), f, &mlp.params()[i])?;
        }
        Ok(suite)
    }

    #[test]
    fn test_create_classifier_shapes() -> Result<()> {
        let mlp = Mlp::new(&[300, 20, 30, 40, 5], &Device::Cpu)?;
        let shapes: Vec<Vec<usize>> = mlp.params().iter().map(|p| p.dims().to_vec()).collect();

        assert_eq!(
            shapes,
            vec![
                vec![300, 20],
                vec![20],
                vec![20, 30],
                vec![30],
                vec![30, 40],
                vec![40],
                vec![40, 5],
                vec![5],
            ]
        );
        assert_eq!(mlp.num_layers(), 4);
        Ok(())
    }

    #[test]
    fn test_rejects_single_dim() {
        assert!(matches!(
            Mlp::new(&[10], &Device::Cpu),
            Err(TaggerError::Config(_))
        ));
    }

    #[test]
    fn test_classifier_output_is_distribution() -> Result<()> {
        let mlp = Mlp::new(&[5, 4, 3], &Device::Cpu)?;
        let x = Tensor::new(&[1f64, 2.0, 3.0, 4.0, 5.0], &Device::Cpu)?;
        let probs = mlp.classifier_output(&x)?.to_vec1::<f64>()?;

        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(mlp.predict(&x)? < 3);
        Ok(())
    }

    #[test]
    fn test_log_linear_gradients_pass_check() -> Result<()> {
        let device = Device::Cpu;
        let mlp = Mlp::log_linear(4, 3, &device)?;
        let x = Tensor::randn(0f64, 1f64, 4, &device)?;

        let suite = check_all_params(&mlp, &x, 1)?;
        assert!(suite.all_passed(), "{:?}", suite.outcomes());
        Ok(())
    }

    #[test]
    fn test_deep_mlp_gradients_pass_check() -> Result<()> {
        let device = Device::Cpu;
        let mlp = Mlp::new(&[5, 4, 3, 2], &device)?;
        let x = Tensor::new(&[1f64, 2.0, 3.0, 4.0, 5.0], &device)?.affine(0.2, 0.0)?;

        let suite = check_all_params(&mlp, &x, 0)?;
        assert_eq!(suite.outcomes().len(), 6);
        assert!(suite.all_passed(), "{:?}", suite.outcomes());
        Ok(())
    }

    #[test]
    fn test_sgd_step_reduces_loss() -> Result<()> {
        let device = Device::Cpu;
        let mut mlp = Mlp::new(&[3, 4, 2], &device)?;
        let x = Tensor::new(&[0.5f64, -1.0, 2.0], &device)?;

        let (before, grads) = mlp.loss_and_gradients(&x, 1)?;
        mlp.sgd_step(&grads, 0.1)?;
        let (after, _) = mlp.loss_and_gradients(&x, 1)?;

        assert!(after < before);
        Ok(())
    }

    #[test]
    fn test_label_out_of_range() -> Result<()> {
        let mlp = Mlp::log_linear(2, 2, &Device::Cpu)?;
        let x = Tensor::new(&[1f64, 1.0], &Device::Cpu)?;
        assert!(mlp.loss_and_gradients(&x, 2).is_err());
        Ok(())
    }
}
