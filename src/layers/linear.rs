/// Fully connected layer with Xavier initialization
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Xavier/Glorot uniform bound for a `fan_in x fan_out` weight
pub fn xavier_bound(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out) as f64).sqrt()
}

/// Dense layer computing `x @ W^T + b`
///
/// Weights are stored as `[out_features, in_features]` and cast to the
/// input dtype at call time, so an F32 layer can consume F64 inputs.
pub struct DenseLayer {
    weight: Tensor,
    bias: Tensor,
}

impl DenseLayer {
    /// Create new dense layer
    ///
    /// # Arguments
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        let bound = xavier_bound(in_features, out_features);
        let weight = vb.get_with_hints(
            (out_features, in_features),
            "weight",
            Init::Uniform { lo: -bound, up: bound },
        )?;
        let bias = vb.get_with_hints(out_features, "bias", Init::Const(0.0))?;

        Ok(Self { weight, bias })
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let dtype = input.dtype();
        let weight = if self.weight.dtype() != dtype {
            self.weight.to_dtype(dtype)?
        } else {
            self.weight.clone()
        };
        let bias = if self.bias.dtype() != dtype {
            self.bias.to_dtype(dtype)?
        } else {
            self.bias.clone()
        };

        input.broadcast_matmul(&weight.t()?)?.broadcast_add(&bias)
    }

    pub fn in_features(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }
}
