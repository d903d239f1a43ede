/// Activation functions and their derivatives
///
/// The derivatives are written out explicitly so that hand-derived
/// backward passes (see `models::mlp`) can be verified with the gradient
/// checker.
use candle_core::{Result, Tensor, D};

/// Element-wise hidden-layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Tanh,
    Relu,
}

impl Activation {
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Activation::Tanh => tanh(x),
            Activation::Relu => relu(x),
        }
    }

    /// Derivative evaluated at the pre-activation `x`
    pub fn derivative(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Activation::Tanh => tanh_derivative(x),
            Activation::Relu => relu_derivative(x),
        }
    }
}

pub fn tanh(x: &Tensor) -> Result<Tensor> {
    x.tanh()
}

/// 1 - tanh(x)^2
pub fn tanh_derivative(x: &Tensor) -> Result<Tensor> {
    x.tanh()?.sqr()?.neg()? + 1.0
}

pub fn relu(x: &Tensor) -> Result<Tensor> {
    x.relu()
}

/// 1 where x > 0, else 0
pub fn relu_derivative(x: &Tensor) -> Result<Tensor> {
    x.gt(&x.zeros_like()?)?.to_dtype(x.dtype())
}

/// Numerically stable softmax over the last dimension
pub fn softmax(x: &Tensor) -> Result<Tensor> {
    let max = x.max_keepdim(D::Minus1)?;
    let exp = x.broadcast_sub(&max)?.exp()?;
    let sum = exp.sum_keepdim(D::Minus1)?;
    exp.broadcast_div(&sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck::gradient_check;
    use candle_core::Device;

    #[test]
    fn test_softmax_rows_sum_to_one() -> Result<()> {
        let x = Tensor::new(&[[1f64, 2.0, 3.0], [1000.0, 1000.0, 1000.0]], &Device::Cpu)?;
        let probs = softmax(&x)?;
        let sums = probs.sum(1)?.to_vec1::<f64>()?;
        for s in sums {
            assert!((s - 1.0).abs() < 1e-12);
        }
        let row = probs.get(1)?.to_vec1::<f64>()?;
        assert!((row[0] - 1.0 / 3.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_relu_derivative_mask() -> Result<()> {
        let x = Tensor::new(&[-1f64, 0.0, 2.5], &Device::Cpu)?;
        assert_eq!(relu_derivative(&x)?.to_vec1::<f64>()?, vec![0.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_tanh_derivative_passes_gradient_check() -> crate::Result<()> {
        let device = Device::Cpu;
        let tanh_f = |x: &Tensor| -> crate::Result<(f64, Tensor)> {
            Ok((tanh(x)?.sum_all()?.to_scalar::<f64>()?, tanh_derivative(x)?))
        };

        assert!(gradient_check(tanh_f, &Tensor::new(123.456f64, &device)?)?);
        assert!(gradient_check(tanh_f, &Tensor::randn(0f64, 1f64, 3, &device)?)?);
        assert!(gradient_check(tanh_f, &Tensor::randn(0f64, 1f64, (4, 5), &device)?)?);
        Ok(())
    }
}
