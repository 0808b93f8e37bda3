//! Epoch-wise batch loading over a burn `Dataset`.
//!
//! Batches are built lazily from index chunks so only one batch of decoded
//! images is alive at a time. Decoding within a batch runs on a rayon pool
//! of `num_workers` threads; item order inside a batch is preserved and a
//! panicking decode propagates to the caller.

use burn::data::dataset::Dataset;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tracing::warn;

/// Splits a dataset into batches of indices and decodes them.
pub struct BatchLoader<I> {
    dataset: Arc<dyn Dataset<I>>,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    num_workers: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl<I: Send> BatchLoader<I> {
    /// Sequential loader; `batch_size` is clamped to at least 1.
    pub fn new(dataset: Arc<dyn Dataset<I>>, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle_seed: None,
            num_workers: 1,
            pool: None,
        }
    }

    /// Reshuffles every epoch from `seed` and the epoch number.
    pub fn shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Decodes with a dedicated pool of `num_workers` threads; 1 keeps
    /// decoding on the calling thread.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self.pool = if self.num_workers > 1 {
            match ThreadPoolBuilder::new().num_threads(self.num_workers).build() {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    warn!("Failed to build a {}-thread decode pool, using the global pool: {}", self.num_workers, e);
                    None
                }
            }
        } else {
            None
        };
        self
    }

    pub fn workers(&self) -> usize {
        self.num_workers
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset<I>> {
        &self.dataset
    }

    /// Number of batches per epoch, the last one possibly partial
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Index chunks for `epoch`
    pub fn epoch_indices(&self, epoch: usize) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut rng);
        }
        indices.chunks(self.batch_size).map(<[usize]>::to_vec).collect()
    }

    /// Decodes the items at `indices`, skipping ones the dataset cannot load.
    pub fn load(&self, indices: &[usize]) -> Vec<I> {
        let dataset = self.dataset.as_ref();
        if self.num_workers <= 1 || indices.len() <= 1 {
            return indices.iter().filter_map(|&i| dataset.get(i)).collect();
        }

        let decode = || indices.par_iter().filter_map(|&i| dataset.get(i)).collect::<Vec<I>>();
        match &self.pool {
            Some(pool) => pool.install(decode),
            None => decode(),
        }
    }

    /// Lazily yields the decoded batches of one epoch; empty batches are skipped.
    pub fn iter_epoch(&self, epoch: usize) -> impl Iterator<Item = Vec<I>> + '_ {
        self.epoch_indices(epoch)
            .into_iter()
            .map(move |indices| self.load(&indices))
            .filter(|items| !items.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::InMemDataset;

    fn numbers(n: usize) -> Arc<dyn Dataset<usize>> {
        Arc::new(InMemDataset::new((0..n).collect()))
    }

    #[test]
    fn test_sequential_batches_cover_dataset() {
        let loader = BatchLoader::new(numbers(10), 4);
        assert_eq!(loader.num_batches(), 3);

        let batches: Vec<Vec<usize>> = loader.iter_epoch(0).collect();
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
    }

    #[test]
    fn test_shuffle_is_seeded_per_epoch() {
        let loader = BatchLoader::new(numbers(32), 8).shuffle(42);
        let first = loader.epoch_indices(0);
        assert_eq!(first, loader.epoch_indices(0));
        assert_ne!(first, loader.epoch_indices(1));

        let mut flat: Vec<usize> = first.into_iter().flatten().collect();
        flat.sort();
        assert_eq!(flat, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_workers_preserve_order() {
        let loader = BatchLoader::new(numbers(20), 20).num_workers(3);
        assert_eq!(loader.workers(), 3);
        let items: Vec<usize> = loader.load(&[5, 3, 9, 1, 0, 7, 2]);
        assert_eq!(items, vec![5, 3, 9, 1, 0, 7, 2]);
    }

    /// Panics when asked for one particular index.
    struct Faulty {
        len: usize,
        bad: usize,
    }

    impl Dataset<usize> for Faulty {
        fn get(&self, index: usize) -> Option<usize> {
            assert_ne!(index, self.bad, "corrupt sample");
            (index < self.len).then_some(index)
        }

        fn len(&self) -> usize {
            self.len
        }
    }

    #[test]
    #[should_panic(expected = "corrupt sample")]
    fn test_worker_panic_is_not_swallowed() {
        let dataset: Arc<dyn Dataset<usize>> = Arc::new(Faulty { len: 8, bad: 6 });
        let loader = BatchLoader::new(dataset, 8).num_workers(4);
        let _ = loader.load(&[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_unloadable_items_are_skipped_in_order() {
        let dataset: Arc<dyn Dataset<usize>> = Arc::new(InMemDataset::new((0..4).collect()));
        let loader = BatchLoader::new(dataset, 8).num_workers(2);
        assert_eq!(loader.load(&[3, 9, 1, 12, 0]), vec![3, 1, 0]);
    }
}
