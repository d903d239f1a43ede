/// Window-based tagger: embeddings of a token window -> tanh MLP -> labels
use std::collections::HashMap;

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{Dropout, Embedding, VarBuilder, VarMap};

use super::{ModelMode, TrainableModel};
use crate::config::WindowTaggerConfig;
use crate::layers::{Activation, DenseLayer};
use crate::{Result, TaggerError};

pub struct WindowTagger {
    config: WindowTaggerConfig,
    varmap: VarMap,
    embedding: Embedding,
    hidden: DenseLayer,
    output: DenseLayer,
    dropout: Dropout,
    mode: ModelMode,
    extra_metadata: Option<serde_json::Value>,
}

impl WindowTagger {
    /// Create a freshly initialized tagger with F32 parameters on `device`
    pub fn new(config: WindowTaggerConfig, device: &Device) -> Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let embedding = candle_nn::embedding(config.vocab_size, config.embedding_dim, vb.pp("embedding"))?;
        let hidden = DenseLayer::new(config.concat_dim(), config.hidden_dim, vb.pp("hidden"))?;
        let output = DenseLayer::new(config.hidden_dim, config.num_labels, vb.pp("output"))?;
        let dropout = Dropout::new(config.dropout);

        Ok(Self {
            config,
            varmap,
            embedding,
            hidden,
            output,
            dropout,
            mode: ModelMode::Train,
            extra_metadata: None,
        })
    }

    /// Attach extra state (typically the serialized token mapper) that is
    /// written next to every checkpoint
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.extra_metadata = Some(metadata);
        self
    }

    pub fn config(&self) -> &WindowTaggerConfig {
        &self.config
    }

    /// Overwrite the parameters with those stored in a safetensors file
    pub fn load_weights<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<()> {
        self.varmap.load(path)?;
        Ok(())
    }
}

impl TrainableModel for WindowTagger {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let window = input.dim(1)?;
        if window != self.config.window_size() {
            return Err(TaggerError::ShapeMismatch {
                expected: vec![input.dim(0)?, self.config.window_size()],
                actual: input.dims().to_vec(),
            });
        }

        // [batch, window] -> [batch, window, emb] -> [batch, window * emb]
        let embedded = self.embedding.forward(input)?.flatten_from(1)?;
        let hidden = Activation::Tanh.forward(&self.hidden.forward(&embedded)?)?;
        let hidden = self.dropout.forward(&hidden, self.mode.is_train())?;
        Ok(self.output.forward(&hidden)?)
    }

    fn parameters(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn set_mode(&mut self, mode: ModelMode) {
        self.mode = mode;
    }

    fn mode(&self) -> ModelMode {
        self.mode
    }

    fn state_dict(&self) -> Result<HashMap<String, Tensor>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| TaggerError::Model(format!("variable map poisoned: {}", e)))?;
        Ok(data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect())
    }

    fn metadata(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "config": self.config,
            "extra": self.extra_metadata,
        }))
    }
}
