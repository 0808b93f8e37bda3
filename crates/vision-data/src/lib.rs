//! Image loading, augmentation and batch mixing for classifier training.
//!
//! This crate provides the image folder dataset, the train and validation
//! transform pipelines (including TrivialAugment and random erasing), the
//! batcher that turns decoded images into tensors, and mixup/cutmix.

pub mod augmentation;
pub mod autoaugment;
pub mod batcher;
pub mod dataset;
pub mod loader;
pub mod mixing;
pub mod transforms;

pub use augmentation::{ImageTransform, TrainTransform, ValTransform};
pub use autoaugment::{AugmentOp, TrivialAugmentWide};
pub use batcher::{ImageBatch, ImageBatcher};
pub use dataset::{ImageFolderDataset, ImageItem};
pub use loader::BatchLoader;
pub use mixing::{check_labels, CutmixBox, MixedBatch, MixupCutmix};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::augmentation::*;
    pub use crate::batcher::*;
    pub use crate::dataset::*;
    pub use crate::loader::*;
    pub use crate::mixing::*;
}
