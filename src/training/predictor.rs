/// Accuracy bookkeeping from raw model outputs
use candle_core::{DType, Tensor, D};

use crate::{Result, TaggerError};

pub trait Predictor {
    /// `(num_correct, total)` for one batch of outputs and gold labels
    fn infer_with_gold(&self, outputs: &Tensor, gold: &Tensor) -> Result<(usize, usize)>;
}

/// Per-position argmax accuracy
///
/// Positions whose gold label is `ignore_label` are left out of both
/// counts. Useful for padding, or for NER where the dominant `O` label
/// would otherwise swamp the score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgmaxPredictor {
    pub ignore_label: Option<u32>,
}

impl ArgmaxPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignoring(label: u32) -> Self {
        Self {
            ignore_label: Some(label),
        }
    }

    /// Predicted label of every position, flattened
    pub fn predict(&self, outputs: &Tensor) -> Result<Vec<u32>> {
        Ok(outputs.argmax(D::Minus1)?.flatten_all()?.to_vec1::<u32>()?)
    }
}

impl Predictor for ArgmaxPredictor {
    fn infer_with_gold(&self, outputs: &Tensor, gold: &Tensor) -> Result<(usize, usize)> {
        let predicted = self.predict(outputs)?;
        let gold = gold.flatten_all()?.to_dtype(DType::U32)?.to_vec1::<u32>()?;
        if predicted.len() != gold.len() {
            return Err(TaggerError::ShapeMismatch {
                expected: vec![predicted.len()],
                actual: vec![gold.len()],
            });
        }

        let (mut correct, mut total) = (0, 0);
        for (p, g) in predicted.iter().zip(gold.iter()) {
            if Some(*g) == self.ignore_label {
                continue;
            }
            total += 1;
            if p == g {
                correct += 1;
            }
        }
        Ok((correct, total))
    }
}
