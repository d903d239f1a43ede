/// Training infrastructure: losses, predictors, checkpoints and the loops
/// that tie them to a model
pub mod checkpoint;
pub mod loss;
pub mod predictor;
pub mod sgd;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointMetadata};
pub use loss::{CrossEntropyLoss, Loss};
pub use predictor::{ArgmaxPredictor, Predictor};
pub use sgd::{accuracy_on_dataset, train_classifier};
pub use trainer::{DevEvaluation, EpochStats, EvalCadence, Trainer, TrainingConfig, TrainingSummary};
