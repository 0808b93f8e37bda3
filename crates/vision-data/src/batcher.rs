//! Turns decoded items into normalized image tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::Rng;
use vision_core::{AugmentationConfig, DataConfig, DataSplit};

use crate::augmentation::ImageTransform;
use crate::dataset::ImageItem;

/// A batch of transformed images and integer labels
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, 3, size, size]`
    pub images: Tensor<B, 4>,
    /// `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Applies one split's pipeline to every item of a batch.
#[derive(Debug, Clone)]
pub struct ImageBatcher {
    transform: ImageTransform,
}

impl ImageBatcher {
    pub fn new(transform: ImageTransform) -> Self {
        Self { transform }
    }

    pub fn for_split(split: DataSplit, data: &DataConfig, augmentation: &AugmentationConfig) -> Self {
        Self::new(ImageTransform::for_split(split, data, augmentation))
    }

    pub fn image_size(&self) -> usize {
        self.transform.output_size()
    }

    /// Builds a batch drawing augmentation randomness from `rng`.
    pub fn batch_with_rng<B: Backend, R: Rng + ?Sized>(
        &self,
        items: Vec<ImageItem>,
        rng: &mut R,
        device: &B::Device,
    ) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size();

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in &items {
            images_data.extend(self.transform.apply(&item.image, rng));
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        self.batch_with_rng(items, &mut rand::thread_rng(), device)
    }
}
