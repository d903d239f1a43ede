/// Data loading modules for tagger training
pub mod corpus;
pub mod features;
pub mod loader;
pub mod mapper;

pub use corpus::{read_tagged_sentences, WindowDataset};
pub use features::FeatureIndex;
pub use loader::{DataLoader, TensorDataset};
pub use mapper::{TokenMapper, UnknownPolicy};

use candle_core::{Device, Tensor};

/// Random-access collection of `(input, label)` examples
///
/// Every example of a dataset has the same input and label shape so that
/// a batch can be stacked along a new leading dimension.
pub trait Dataset: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Example at `index`, placed on `device`
    fn get(&self, index: usize, device: &Device) -> crate::Result<(Tensor, Tensor)>;
}

/// Generic data loader trait
pub trait BatchDataLoader {
    /// Get next batch of (input, target) tensors
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<(Tensor, Tensor)>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;

    /// Number of examples across all batches
    fn num_samples(&self) -> usize;
}
