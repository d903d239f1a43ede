/// Epoch/minibatch training loop with best-model checkpointing
///
/// One loop covers the plain, acceptor and BiLSTM trainers: they differ
/// only in how often the dev set is evaluated ([`EvalCadence`]) and in the
/// dev batch size ([`TrainingConfig::dev_batch_multiplier`]).
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use serde::{Deserialize, Serialize};

use super::checkpoint::{self, Checkpoint, CheckpointMetadata};
use super::loss::Loss;
use super::predictor::Predictor;
use crate::data::{BatchDataLoader, DataLoader, Dataset};
use crate::models::{ModelMode, TrainableModel};
use crate::utils::{count_var_parameters, parse_device};
use crate::{Result, TaggerError};

/// Best accuracy before any epoch has been evaluated
const INITIAL_BEST_ACCURACY: f64 = -1000.0;

/// When the dev set is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalCadence {
    /// Once, after every epoch
    #[default]
    EndOfEpoch,
    /// Also every `print_step` batches, alongside the progress line
    EveryPrintStep,
}

fn default_dev_batch_multiplier() -> usize {
    1
}

/// Training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Training batch size
    pub batch_size: usize,
    /// Threads fetching examples for each batch (0 loads inline)
    pub num_workers: usize,
    /// Number of training epochs
    pub num_epochs: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Batches between progress reports
    pub print_step: usize,
    /// Execution target: `cpu`, `cuda[:N]` or `metal[:N]`
    pub device: String,
    /// Checkpoint root directory
    pub checkpoints_path: PathBuf,
    #[serde(default)]
    pub eval_cadence: EvalCadence,
    /// Dev batch size as a multiple of `batch_size`
    #[serde(default = "default_dev_batch_multiplier")]
    pub dev_batch_multiplier: usize,
    /// Shuffle training examples every epoch
    #[serde(default)]
    pub shuffle: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            num_workers: 0,
            num_epochs: 10,
            learning_rate: 1e-3,
            print_step: 100,
            device: "cpu".to_string(),
            checkpoints_path: PathBuf::from("checkpoints"),
            eval_cadence: EvalCadence::EndOfEpoch,
            dev_batch_multiplier: 1,
            shuffle: false,
        }
    }
}

impl TrainingConfig {
    /// Sequence-tagger preset: dev accuracy at every progress report and
    /// 40x larger dev batches
    pub fn bilstm() -> Self {
        Self {
            eval_cadence: EvalCadence::EveryPrintStep,
            dev_batch_multiplier: 40,
            ..Self::default()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.num_epochs == 0 || self.print_step == 0 {
            return Err(TaggerError::Config(
                "batch_size, num_epochs and print_step must be > 0".to_string(),
            ));
        }

        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(TaggerError::Config(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }

        if self.dev_batch_multiplier == 0 {
            return Err(TaggerError::Config(
                "dev_batch_multiplier must be >= 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Device named by `device`
    pub fn resolve_device(&self) -> Result<Device> {
        parse_device(&self.device)
    }

    pub fn dev_batch_size(&self) -> usize {
        self.batch_size * self.dev_batch_multiplier
    }
}

/// Loss and accuracy over a whole dev set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevEvaluation {
    /// Sum of batch losses weighted by batch size, over dev set size
    pub loss: f64,
    /// Correct predictions over total predictions, summed across batches
    pub accuracy: f64,
    pub correct: usize,
    pub total: usize,
}

/// What happened in one epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    /// 1-based epoch number
    pub epoch: usize,
    /// Per-sample mean training loss
    pub train_loss: f64,
    pub dev: DevEvaluation,
    /// Set when this epoch improved on the best dev accuracy
    pub checkpoint: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochStats>,
    pub best_dev_accuracy: Option<f64>,
}

impl TrainingSummary {
    /// Paths written, one per improving epoch
    pub fn checkpoints(&self) -> impl Iterator<Item = (usize, &Path)> {
        self.epochs
            .iter()
            .filter_map(|stats| stats.checkpoint.as_deref().map(|path| (stats.epoch, path)))
    }
}

/// Trainer for any [`TrainableModel`]
pub struct Trainer<M, P, L> {
    model: M,
    config: TrainingConfig,
    predictor: P,
    loss: L,
    device: Device,
    current_epoch: usize,
}

impl<M, P, L> Trainer<M, P, L>
where
    M: TrainableModel,
    P: Predictor,
    L: Loss,
{
    /// Create new trainer
    ///
    /// The model must already live on the configured device: batches are
    /// moved there, parameters are not.
    pub fn new(model: M, config: TrainingConfig, predictor: P, loss: L) -> Result<Self> {
        config.validate()?;
        let device = config.resolve_device()?;

        if let Some(param) = model.parameters().first() {
            if !param.device().same_device(&device) {
                return Err(TaggerError::Config(format!(
                    "model parameters are on {:?} but training is configured for {:?}",
                    param.device(),
                    device
                )));
            }
        }

        Ok(Self {
            model,
            config,
            predictor,
            loss,
            device,
            current_epoch: 0,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of completed epochs; the next `train` call starts here
    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Resume from a given epoch
    pub fn set_current_epoch(&mut self, epoch: usize) {
        self.current_epoch = epoch;
    }

    /// Full training loop
    ///
    /// Runs epochs `current_epoch..num_epochs`. After each one the dev set
    /// is evaluated and, when its accuracy strictly beats the best seen in
    /// this call, a checkpoint is written under
    /// `checkpoints_path/model_name`.
    pub fn train<T, D>(&mut self, model_name: &str, train_dataset: &T, dev_dataset: &D) -> Result<TrainingSummary>
    where
        T: Dataset + ?Sized,
        D: Dataset + ?Sized,
    {
        if train_dataset.is_empty() || dev_dataset.is_empty() {
            return Err(TaggerError::Training(
                "train and dev datasets must not be empty".to_string(),
            ));
        }

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let parameters = self.model.parameters();
        let num_parameters = count_var_parameters(&parameters);
        let mut optimizer = AdamW::new(parameters, params)?;

        let mut train_loader = DataLoader::new(train_dataset, self.config.batch_size)?
            .with_shuffle(self.config.shuffle)
            .with_workers(self.config.num_workers)?;
        let mut dev_loader = DataLoader::new(dev_dataset, self.config.dev_batch_size())?
            .with_workers(self.config.num_workers)?;

        log::info!(
            "Training {} for epochs {}..{} on {:?}: {} parameters, {} train / {} dev samples",
            model_name,
            self.current_epoch + 1,
            self.config.num_epochs,
            self.device,
            num_parameters,
            train_dataset.len(),
            dev_dataset.len()
        );

        let train_start = Instant::now();
        let mut best_dev_accuracy = INITIAL_BEST_ACCURACY;
        let mut epochs = Vec::new();

        for epoch in self.current_epoch..self.config.num_epochs {
            let epoch_num = epoch + 1;
            let epoch_start = Instant::now();

            let train_loss = self.train_epoch(
                epoch_num,
                &mut optimizer,
                &mut train_loader,
                &mut dev_loader,
                train_start,
            )?;
            let dev = self.evaluate(&mut dev_loader)?;

            log::info!("Epoch {} Loss on Train set is:\t{:.6}", epoch_num, train_loss);
            log::info!("Epoch {} Loss on Dev set is:\t{:.6}", epoch_num, dev.loss);
            log::info!("Epoch {} Accuracy on Dev set is:\t{:.6}", epoch_num, dev.accuracy);
            log::info!(
                "Epoch {} (including prediction) took {} seconds",
                epoch_num,
                epoch_start.elapsed().as_secs()
            );

            let checkpoint = if dev.accuracy > best_dev_accuracy {
                best_dev_accuracy = dev.accuracy;
                log::info!(
                    "Epoch {} Saving best model so far with accuracy of {:.6} on Dev set",
                    epoch_num,
                    best_dev_accuracy
                );
                Some(self.save_checkpoint(model_name, epoch_num, &dev)?)
            } else {
                None
            };

            epochs.push(EpochStats {
                epoch: epoch_num,
                train_loss,
                dev,
                checkpoint,
            });
            self.current_epoch = epoch_num;
        }

        log::info!("Training complete!");

        Ok(TrainingSummary {
            best_dev_accuracy: (!epochs.is_empty()).then_some(best_dev_accuracy),
            epochs,
        })
    }

    /// Train for one epoch, returning the per-sample mean loss
    fn train_epoch<T, D>(
        &mut self,
        epoch_num: usize,
        optimizer: &mut AdamW,
        train_loader: &mut DataLoader<'_, T>,
        dev_loader: &mut DataLoader<'_, D>,
        train_start: Instant,
    ) -> Result<f64>
    where
        T: Dataset + ?Sized,
        D: Dataset + ?Sized,
    {
        self.model.set_mode(ModelMode::Train);
        train_loader.reset();

        let num_batches = train_loader.num_batches();
        let num_samples = train_loader.num_samples();
        let mut running_loss = 0.0;
        let mut running_samples = 0usize;
        let mut epoch_loss = 0.0;
        let mut samples_seen = 0usize;
        let mut batch_idx = 0usize;

        while let Some((x, y)) = train_loader.next_batch(&self.device)? {
            batch_idx += 1;

            let outputs = self.model.forward(&x)?;
            let loss = self.loss.compute(&outputs, &y)?;
            optimizer.backward_step(&loss)?;

            let batch_len = x.dim(0)?;
            let weighted = scalar(&loss)? * batch_len as f64;
            epoch_loss += weighted;
            running_loss += weighted;
            running_samples += batch_len;
            samples_seen += batch_len;

            if batch_idx % self.config.print_step == 0 {
                log::info!(
                    "Train Epoch: {} [{}/{} ({:.0}%)]\t Average Loss: {:.6} Training began {} seconds ago",
                    epoch_num,
                    samples_seen,
                    num_samples,
                    100.0 * batch_idx as f64 / num_batches as f64,
                    running_loss / running_samples as f64,
                    train_start.elapsed().as_secs()
                );
                running_loss = 0.0;
                running_samples = 0;

                if self.config.eval_cadence == EvalCadence::EveryPrintStep {
                    let dev = self.evaluate(dev_loader)?;
                    log::info!(
                        "After {} samples, accuracy on dev set is {:.6}",
                        samples_seen,
                        dev.accuracy
                    );
                    self.model.set_mode(ModelMode::Train);
                }
            }
        }

        Ok(epoch_loss / num_samples as f64)
    }

    /// Run the whole dev set in eval mode without tracking gradients
    fn evaluate<D>(&mut self, dev_loader: &mut DataLoader<'_, D>) -> Result<DevEvaluation>
    where
        D: Dataset + ?Sized,
    {
        self.model.set_mode(ModelMode::Eval);
        dev_loader.reset();

        let mut dev_loss = 0.0;
        let mut correct = 0usize;
        let mut total = 0usize;

        while let Some((x, y)) = dev_loader.next_batch(&self.device)? {
            let outputs = self.model.forward(&x)?.detach();
            let loss = self.loss.compute(&outputs, &y)?;
            dev_loss += scalar(&loss)? * x.dim(0)? as f64;

            let (batch_correct, batch_total) = self.predictor.infer_with_gold(&outputs, &y)?;
            correct += batch_correct;
            total += batch_total;
        }

        if total == 0 {
            return Err(TaggerError::Training(
                "dev set produced no predictions to score".to_string(),
            ));
        }

        Ok(DevEvaluation {
            loss: dev_loss / dev_loader.num_samples() as f64,
            accuracy: correct as f64 / total as f64,
            correct,
            total,
        })
    }

    /// Save checkpoint
    fn save_checkpoint(&self, model_name: &str, epoch: usize, dev: &DevEvaluation) -> Result<PathBuf> {
        let today = chrono::Local::now().date_naive();
        let path = checkpoint::checkpoint_path(&self.config.checkpoints_path, model_name, today);

        let tensors = self.model.state_dict().map_err(|e| TaggerError::Checkpoint {
            path: path.clone(),
            source: Box::new(e),
        })?;
        let metadata = CheckpointMetadata {
            model_name: model_name.to_string(),
            epoch,
            dev_accuracy: dev.accuracy,
            dev_loss: dev.loss,
            saved_on: checkpoint::format_date(today),
            model: self.model.metadata(),
        };

        Checkpoint::new(tensors, metadata).save(&path)?;
        log::info!("Saved checkpoint to {}", path.display());
        Ok(path)
    }
}

fn scalar(loss: &Tensor) -> Result<f64> {
    Ok(loss.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}
