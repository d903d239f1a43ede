/// Minibatch loading over a [`Dataset`]
use candle_core::{Device, Tensor};
use rayon::prelude::*;

use super::{BatchDataLoader, Dataset};
use crate::{Result, TaggerError};

/// In-memory dataset backed by two tensors sharing their first dimension
pub struct TensorDataset {
    inputs: Tensor,
    labels: Tensor,
}

impl TensorDataset {
    pub fn new(inputs: Tensor, labels: Tensor) -> Result<Self> {
        let (n_inputs, n_labels) = (inputs.dim(0)?, labels.dim(0)?);
        if n_inputs != n_labels {
            return Err(TaggerError::ShapeMismatch {
                expected: vec![n_inputs],
                actual: vec![n_labels],
            });
        }
        Ok(Self { inputs, labels })
    }
}

impl Dataset for TensorDataset {
    fn len(&self) -> usize {
        self.inputs.dims()[0]
    }

    fn get(&self, index: usize, device: &Device) -> Result<(Tensor, Tensor)> {
        let input = self.inputs.get(index)?.to_device(device)?;
        let label = self.labels.get(index)?.to_device(device)?;
        Ok((input, label))
    }
}

/// Batches a dataset in index order (or shuffled per epoch)
///
/// With `num_workers > 0` the examples of each batch are fetched on a
/// dedicated rayon pool of that many threads. Batch composition and order
/// do not depend on the worker count.
pub struct DataLoader<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    batch_size: usize,
    current_idx: usize,
    indices: Vec<usize>,
    shuffle: bool,
    pool: Option<rayon::ThreadPool>,
}

impl<'a, D: Dataset + ?Sized> DataLoader<'a, D> {
    /// Create new data loader
    pub fn new(dataset: &'a D, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TaggerError::Config("batch_size must be > 0".to_string()));
        }

        Ok(Self {
            dataset,
            batch_size,
            current_idx: 0,
            indices: (0..dataset.len()).collect(),
            shuffle: false,
            pool: None,
        })
    }

    /// Shuffle example order at construction and on every reset
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        if shuffle {
            self.shuffle_indices();
        }
        self
    }

    /// Fetch examples on `num_workers` threads (0 keeps loading inline)
    pub fn with_workers(mut self, num_workers: usize) -> Result<Self> {
        self.pool = if num_workers == 0 {
            None
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .thread_name(|i| format!("data-loader-{}", i))
                .build()
                .map_err(|e| TaggerError::DataLoad(format!("failed to start loader workers: {}", e)))?;
            Some(pool)
        };
        Ok(self)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn shuffle_indices(&mut self) {
        use rand::seq::SliceRandom;
        let mut rng = rand::thread_rng();
        self.indices.shuffle(&mut rng);
    }

    fn fetch(&self, batch_indices: &[usize], device: &Device) -> Result<Vec<(Tensor, Tensor)>> {
        let dataset = self.dataset;
        match &self.pool {
            Some(pool) => pool.install(|| {
                batch_indices
                    .par_iter()
                    .map(|&idx| dataset.get(idx, device))
                    .collect()
            }),
            None => batch_indices.iter().map(|&idx| dataset.get(idx, device)).collect(),
        }
    }
}

impl<'a, D: Dataset + ?Sized> BatchDataLoader for DataLoader<'a, D> {
    fn next_batch(&mut self, device: &Device) -> Result<Option<(Tensor, Tensor)>> {
        if self.current_idx >= self.indices.len() {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let examples = self.fetch(&self.indices[self.current_idx..end_idx], device)?;
        self.current_idx = end_idx;

        let (inputs, labels): (Vec<Tensor>, Vec<Tensor>) = examples.into_iter().unzip();
        let inputs = Tensor::stack(&inputs, 0)
            .map_err(|e| TaggerError::DataLoad(format!("cannot batch inputs: {}", e)))?;
        let labels = Tensor::stack(&labels, 0)
            .map_err(|e| TaggerError::DataLoad(format!("cannot batch labels: {}", e)))?;

        Ok(Some((inputs, labels)))
    }

    fn reset(&mut self) {
        self.current_idx = 0;
        if self.shuffle {
            self.shuffle_indices();
        }
    }

    fn num_batches(&self) -> usize {
        (self.indices.len() + self.batch_size - 1) / self.batch_size
    }

    fn num_samples(&self) -> usize {
        self.indices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> Result<TensorDataset> {
        let device = Device::Cpu;
        let inputs = Tensor::arange(0u32, (n * 2) as u32, &device)?.reshape((n, 2))?;
        let labels = Tensor::arange(0u32, n as u32, &device)?;
        TensorDataset::new(inputs, labels)
    }

    fn collect_labels(loader: &mut impl BatchDataLoader) -> Result<Vec<Vec<u32>>> {
        let mut batches = Vec::new();
        while let Some((_, labels)) = loader.next_batch(&Device::Cpu)? {
            batches.push(labels.to_vec1::<u32>()?);
        }
        Ok(batches)
    }

    #[test]
    fn test_partial_final_batch() -> Result<()> {
        let data = dataset(7)?;
        let mut loader = DataLoader::new(&data, 3)?;

        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.num_samples(), 7);
        assert_eq!(
            collect_labels(&mut loader)?,
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
        Ok(())
    }

    #[test]
    fn test_batches_stack_inputs() -> Result<()> {
        let data = dataset(4)?;
        let mut loader = DataLoader::new(&data, 2)?;
        let (inputs, labels) = loader.next_batch(&Device::Cpu)?.expect("first batch");

        assert_eq!(inputs.dims(), &[2, 2]);
        assert_eq!(inputs.to_vec2::<u32>()?, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(labels.dims(), &[2]);
        Ok(())
    }

    #[test]
    fn test_workers_do_not_change_batches() -> Result<()> {
        let data = dataset(10)?;
        let mut inline = DataLoader::new(&data, 4)?;
        let mut threaded = DataLoader::new(&data, 4)?.with_workers(3)?;

        assert_eq!(collect_labels(&mut inline)?, collect_labels(&mut threaded)?);
        Ok(())
    }

    #[test]
    fn test_reset_restarts_epoch() -> Result<()> {
        let data = dataset(5)?;
        let mut loader = DataLoader::new(&data, 2)?.with_shuffle(true);

        let mut first: Vec<u32> = collect_labels(&mut loader)?.concat();
        assert!(loader.next_batch(&Device::Cpu)?.is_none());

        loader.reset();
        let mut second: Vec<u32> = collect_labels(&mut loader)?.concat();

        first.sort();
        second.sort();
        assert_eq!(first, vec![0, 1, 2, 3, 4]);
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_zero_batch_size_rejected() -> Result<()> {
        let data = dataset(2)?;
        assert!(DataLoader::new(&data, 0).is_err());
        Ok(())
    }
}
