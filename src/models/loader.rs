/// Restoring a trained model from a best-model checkpoint
use std::path::Path;

use candle_core::Device;

use super::WindowTagger;
use crate::config::WindowTaggerConfig;
use crate::training::checkpoint::{metadata_path, CheckpointMetadata};
use crate::{Result, TaggerError};

/// Load a [`WindowTagger`] from its safetensors file and metadata sidecar
///
/// The architecture comes from the sidecar's `model.config`; any extra
/// state saved with the model (e.g. the token mapper) is reattached.
pub fn load_window_tagger<P: AsRef<Path>>(checkpoint_path: P, device: &Device) -> Result<WindowTagger> {
    let checkpoint_path = checkpoint_path.as_ref();
    let metadata = CheckpointMetadata::load(metadata_path(checkpoint_path))?;

    let model = metadata.model.ok_or_else(|| {
        TaggerError::Model(format!(
            "checkpoint {} carries no model metadata",
            checkpoint_path.display()
        ))
    })?;
    let config: WindowTaggerConfig = serde_json::from_value(model["config"].clone())?;

    let mut tagger = WindowTagger::new(config, device)?;
    tagger.load_weights(checkpoint_path)?;
    if !model["extra"].is_null() {
        tagger = tagger.with_metadata(model["extra"].clone());
    }

    log::info!(
        "Loaded {} (epoch {}, dev accuracy {:.4}) from {}",
        metadata.model_name,
        metadata.epoch,
        metadata.dev_accuracy,
        checkpoint_path.display()
    );
    Ok(tagger)
}
