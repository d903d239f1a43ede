/// Model capability used by the training loop, plus concrete models
///
/// The trainer only sees [`TrainableModel`]: a forward pass, the trainable
/// variables, a train/eval switch and a serializable state. It knows
/// nothing about the architecture behind it.
use std::collections::HashMap;

use candle_core::{Tensor, Var};

pub mod loader;
pub mod mlp;
pub mod window_tagger;

pub use mlp::Mlp;
pub use window_tagger::WindowTagger;

/// Whether layers such as dropout are active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelMode {
    Train,
    Eval,
}

impl ModelMode {
    pub fn is_train(&self) -> bool {
        matches!(self, ModelMode::Train)
    }
}

pub trait TrainableModel {
    /// Raw outputs (logits) for a batch of inputs
    fn forward(&self, input: &Tensor) -> crate::Result<Tensor>;

    /// Variables the optimizer updates
    fn parameters(&self) -> Vec<Var>;

    fn set_mode(&mut self, mode: ModelMode);

    fn mode(&self) -> ModelMode;

    /// Named tensors making up a checkpoint
    fn state_dict(&self) -> crate::Result<HashMap<String, Tensor>>;

    /// Extra state needed to use a restored model (config, vocabularies)
    fn metadata(&self) -> Option<serde_json::Value> {
        None
    }
}
