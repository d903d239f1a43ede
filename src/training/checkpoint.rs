/// Best-model checkpointing with safetensors
///
/// A checkpoint is two files sharing a stem:
/// `<checkpoints_path>/<model_name>/<DD-MM-YY>_best_model.safetensors` with the
/// model's named tensors, and a `.json` sidecar with [`CheckpointMetadata`].
/// Saving twice on the same day overwrites the earlier files.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use chrono::NaiveDate;

use crate::{Result, TaggerError};

/// File name suffix shared by every best-model checkpoint
pub const BEST_MODEL_SUFFIX: &str = "best_model";

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    pub model_name: String,
    /// 1-based epoch that produced this checkpoint
    pub epoch: usize,
    pub dev_accuracy: f64,
    pub dev_loss: f64,
    /// Calendar date as `DD-MM-YY`
    pub saved_on: String,
    /// Model-specific state (config, vocabularies)
    #[serde(default)]
    pub model: Option<serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// `DD-MM-YY`
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d-%m-%y").to_string()
}

/// Directory holding every checkpoint of `model_name`
pub fn checkpoint_dir<P: AsRef<Path>>(checkpoints_path: P, model_name: &str) -> PathBuf {
    checkpoints_path.as_ref().join(model_name)
}

/// Tensor file of the best checkpoint saved on `date`
pub fn checkpoint_path<P: AsRef<Path>>(checkpoints_path: P, model_name: &str, date: NaiveDate) -> PathBuf {
    checkpoint_dir(checkpoints_path, model_name)
        .join(format!("{}_{}.safetensors", format_date(date), BEST_MODEL_SUFFIX))
}

/// Sidecar metadata file for a tensor file
pub fn metadata_path<P: AsRef<Path>>(checkpoint: P) -> PathBuf {
    checkpoint.as_ref().with_extension("json")
}

/// Model checkpoint
pub struct Checkpoint {
    /// Model parameters
    pub tensors: HashMap<String, Tensor>,
    /// Metadata
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Create new checkpoint
    pub fn new(tensors: HashMap<String, Tensor>, metadata: CheckpointMetadata) -> Self {
        Self { tensors, metadata }
    }

    /// Save checkpoint to `path` plus its metadata sidecar
    ///
    /// Parent directories are created if missing. Any failure is reported
    /// as [`TaggerError::Checkpoint`].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.write(path).map_err(|e| TaggerError::Checkpoint {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
    }

    fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        candle_core::safetensors::save(&self.tensors, path)?;

        let metadata_json = serde_json::to_string_pretty(&self.metadata)?;
        std::fs::write(metadata_path(path), metadata_json.as_bytes())?;

        log::debug!("Wrote {} tensors to {}", self.tensors.len(), path.display());
        Ok(())
    }

    /// Load checkpoint from file
    ///
    /// # Arguments
    /// * `path` - Path to the tensor file (the sidecar is found next to it)
    /// * `device` - Device to load tensors on
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, device)?;
        let metadata = CheckpointMetadata::load(metadata_path(path))?;

        Ok(Self { tensors, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn metadata() -> CheckpointMetadata {
        CheckpointMetadata {
            model_name: "pos".to_string(),
            epoch: 3,
            dev_accuracy: 0.875,
            dev_loss: 0.25,
            saved_on: "05-03-24".to_string(),
            model: Some(serde_json::json!({"hidden_dim": 16})),
        }
    }

    #[test]
    fn test_checkpoint_path_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).expect("valid date");
        let path = checkpoint_path("checkpoints", "ner", date);

        assert_eq!(
            path,
            PathBuf::from("checkpoints/ner/05-03-24_best_model.safetensors")
        );
        assert_eq!(
            metadata_path(&path),
            PathBuf::from("checkpoints/ner/05-03-24_best_model.json")
        );
    }

    #[test]
    fn test_save_load_checkpoint() -> Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pos").join("05-03-24_best_model.safetensors");

        let mut tensors = HashMap::new();
        tensors.insert("weight".to_string(), Tensor::ones((5, 5), DType::F32, &device)?);

        Checkpoint::new(tensors, metadata()).save(&path)?;
        let loaded = Checkpoint::load(&path, &device)?;

        assert_eq!(loaded.metadata, metadata());
        assert_eq!(loaded.tensors["weight"].dims(), &[5, 5]);
        assert_eq!(loaded.tensors["weight"].sum_all()?.to_scalar::<f32>()?, 25.0);
        Ok(())
    }

    #[test]
    fn test_save_overwrites_same_path() -> Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("05-03-24_best_model.safetensors");

        let mut first = HashMap::new();
        first.insert("w".to_string(), Tensor::zeros(3, DType::F32, &device)?);
        Checkpoint::new(first, metadata()).save(&path)?;

        let mut second = HashMap::new();
        second.insert("w".to_string(), Tensor::ones(3, DType::F32, &device)?);
        let mut newer = metadata();
        newer.epoch = 4;
        Checkpoint::new(second, newer).save(&path)?;

        let loaded = Checkpoint::load(&path, &device)?;
        assert_eq!(loaded.metadata.epoch, 4);
        assert_eq!(loaded.tensors["w"].to_vec1::<f32>()?, vec![1.0, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_write_failure_is_checkpoint_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // A regular file where a directory is expected
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x")?;
        let path = blocker.join("model").join("x_best_model.safetensors");

        let result = Checkpoint::new(HashMap::new(), metadata()).save(&path);
        assert!(matches!(result, Err(TaggerError::Checkpoint { .. })));
        Ok(())
    }
}
