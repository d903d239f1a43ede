/// Configuration for the window-based tagger
///
/// A token is classified from the embeddings of a fixed window of tokens
/// centred on it, concatenated and fed through one hidden layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WindowTaggerConfig {
    /// Number of token indices (mapper tokens dim)
    pub vocab_size: usize,

    /// Number of output labels (mapper labels dim)
    pub num_labels: usize,

    /// Embedding dimension per token
    pub embedding_dim: usize,

    /// Hidden layer size
    pub hidden_dim: usize,

    /// Tokens on each side of the centre token
    pub half_window: usize,

    /// Dropout probability after the hidden layer (training mode only)
    pub dropout: f32,
}

impl Default for WindowTaggerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 0,
            num_labels: 0,
            embedding_dim: 50,
            hidden_dim: 100,
            half_window: 2,
            dropout: 0.0,
        }
    }
}

impl WindowTaggerConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.vocab_size == 0 || self.num_labels == 0 {
            return Err(crate::TaggerError::Config(
                "vocab_size and num_labels must be > 0".to_string(),
            ));
        }

        if self.embedding_dim == 0 || self.hidden_dim == 0 {
            return Err(crate::TaggerError::Config(
                "embedding_dim and hidden_dim must be > 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(crate::TaggerError::Config(format!(
                "Invalid dropout: {}. Must be in [0, 1)",
                self.dropout
            )));
        }

        Ok(())
    }

    /// Tokens per window
    pub fn window_size(&self) -> usize {
        2 * self.half_window + 1
    }

    /// Width of the concatenated window embedding
    pub fn concat_dim(&self) -> usize {
        self.window_size() * self.embedding_dim
    }
}
