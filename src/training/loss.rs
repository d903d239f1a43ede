/// Loss capability and cross-entropy over class logits
use candle_core::{DType, Tensor, D};

use crate::{Result, TaggerError};

pub trait Loss {
    /// Scalar, differentiable loss of `outputs` against `gold`
    fn compute(&self, outputs: &Tensor, gold: &Tensor) -> Result<Tensor>;
}

/// Mean negative log-likelihood of the gold class
///
/// Accepts `[batch, classes]` logits with `[batch]` gold labels, or
/// `[batch, len, classes]` with `[batch, len]`. Positions whose gold label
/// equals `ignore_index` (padding) contribute nothing and are excluded
/// from the mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss {
    pub ignore_index: Option<u32>,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignoring(index: u32) -> Self {
        Self {
            ignore_index: Some(index),
        }
    }
}

impl Loss for CrossEntropyLoss {
    fn compute(&self, outputs: &Tensor, gold: &Tensor) -> Result<Tensor> {
        let classes = outputs.dim(D::Minus1)?;
        let expected: Vec<usize> = outputs.dims()[..outputs.rank() - 1].to_vec();
        if gold.dims() != expected.as_slice() {
            return Err(TaggerError::ShapeMismatch {
                expected,
                actual: gold.dims().to_vec(),
            });
        }

        let logits = outputs.reshape(((), classes))?;
        let gold = gold.flatten_all()?.to_dtype(DType::U32)?;

        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let picked = log_probs.gather(&gold.unsqueeze(1)?, 1)?.squeeze(1)?;

        match self.ignore_index {
            None => Ok(picked.mean_all()?.neg()?),
            Some(index) => {
                let ignored = Tensor::full(index, gold.shape().clone(), gold.device())?;
                let mask = gold.ne(&ignored)?.to_dtype(picked.dtype())?;
                let count = mask.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
                if count == 0.0 {
                    return Err(TaggerError::Training(
                        "every position in the batch is ignored".to_string(),
                    ));
                }
                Ok((picked.mul(&mask)?.sum_all()?.neg()? / count)?)
            }
        }
    }
}
