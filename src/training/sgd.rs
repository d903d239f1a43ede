/// Per-example SGD for the hand-differentiated [`Mlp`]
use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::models::Mlp;
use crate::{Result, TaggerError};

/// A labelled feature vector
pub type Example = (usize, Tensor);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationStats {
    /// 0-based iteration
    pub iteration: usize,
    /// Mean loss over the training examples
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub dev_accuracy: f64,
}

/// Fraction of examples whose predicted class matches the label
pub fn accuracy_on_dataset(examples: &[Example], mlp: &Mlp) -> Result<f64> {
    if examples.is_empty() {
        return Err(TaggerError::Training("cannot score an empty dataset".to_string()));
    }

    let mut good = 0usize;
    for (label, features) in examples {
        if mlp.predict(features)? == *label {
            good += 1;
        }
    }
    Ok(good as f64 / examples.len() as f64)
}

/// Train `mlp` in place for `num_iterations` passes over `train`
///
/// Each pass shuffles `train` with an RNG seeded from `seed`, then applies
/// `p -= learning_rate * g` after every example.
pub fn train_classifier(
    train: &mut [Example],
    dev: &[Example],
    num_iterations: usize,
    learning_rate: f64,
    mlp: &mut Mlp,
    seed: u64,
) -> Result<Vec<IterationStats>> {
    if train.is_empty() {
        return Err(TaggerError::Training("training set is empty".to_string()));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut history = Vec::with_capacity(num_iterations);

    for iteration in 0..num_iterations {
        train.shuffle(&mut rng);

        let mut cum_loss = 0.0;
        for (label, features) in train.iter() {
            let (loss, grads) = mlp.loss_and_gradients(features, *label)?;
            cum_loss += loss;
            mlp.sgd_step(&grads, learning_rate)?;
        }

        let stats = IterationStats {
            iteration,
            train_loss: cum_loss / train.len() as f64,
            train_accuracy: accuracy_on_dataset(train, mlp)?,
            dev_accuracy: accuracy_on_dataset(dev, mlp)?,
        };
        log::info!(
            "{} {:.6} {:.4} {:.4}",
            stats.iteration,
            stats.train_loss,
            stats.train_accuracy,
            stats.dev_accuracy
        );
        history.push(stats);
    }

    Ok(history)
}
