//! Tiny Tagger - machine-learning building blocks on candle
//!
//! Small, self-contained pieces for training sequence taggers and checking
//! the math behind them.
//!
//! # Components
//!
//! - [`gradcheck`]: central-difference verification of analytic gradients
//! - [`training`]: a single configurable epoch/minibatch training loop with
//!   dev evaluation and best-model checkpointing
//! - [`data`]: token/label mappers, windowed tagging datasets, bigram
//!   features and batch loading
//! - [`models`]: the model capability trait, a window tagger and a
//!   from-scratch MLP with manual backpropagation
//!
//! # Example
//!
//! ```ignore
//! use candle_core::{Device, Tensor};
//! use tiny_tagger::gradcheck::gradient_check;
//!
//! let x = Tensor::randn(0f64, 1f64, (4, 5), &Device::Cpu)?;
//! let passed = gradient_check(
//!     |x: &Tensor| Ok((x.sqr()?.sum_all()?.to_scalar::<f64>()?, (x * 2.0)?)),
//!     &x,
//! )?;
//! assert!(passed);
//! ```

pub mod config;
pub mod data;
pub mod gradcheck;
pub mod layers;
pub mod models;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::WindowTaggerConfig;
pub use gradcheck::{GradCheckOutcome, GradientChecker};
pub use models::{ModelMode, TrainableModel};
pub use training::{Trainer, TrainingConfig};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum TaggerError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Data loading error: {0}")]
    DataLoad(String),

    #[error("Failed to write checkpoint {path}: {source}")]
    Checkpoint {
        path: std::path::PathBuf,
        #[source]
        source: Box<TaggerError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaggerError>;
