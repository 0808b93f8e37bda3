//! Train and validation transform pipelines.
//!
//! Both pipelines turn a decoded RGB image into a normalized CHW float
//! buffer of a fixed square size. The train pipeline is stochastic and draws
//! from the caller's RNG; the validation pipeline is deterministic.

use image::RgbImage;
use rand::Rng;
use vision_core::{AugmentationConfig, DataConfig, DataSplit};

use crate::autoaugment::TrivialAugmentWide;
use crate::transforms::{
    center_crop, normalize, random_erasing, random_horizontal_flip, random_resized_crop,
    resize_shorter_side, to_chw_float, NORMALIZE_MEAN, NORMALIZE_STD,
};

const HFLIP_PROB: f64 = 0.5;

/// Stochastic training pipeline
#[derive(Debug, Clone)]
pub struct TrainTransform {
    crop_size: u32,
    auto_augment: TrivialAugmentWide,
    random_erasing_p: f64,
}

impl TrainTransform {
    pub fn new(crop_size: u32, random_erasing_p: f64) -> Self {
        Self {
            crop_size,
            auto_augment: TrivialAugmentWide::new(),
            random_erasing_p,
        }
    }

    /// Crop, flip, TrivialAugment, normalize and optionally erase
    pub fn apply<R: Rng + ?Sized>(&self, image: &RgbImage, rng: &mut R) -> Vec<f32> {
        let mut cropped = random_resized_crop(image, self.crop_size, rng);
        random_horizontal_flip(&mut cropped, HFLIP_PROB, rng);
        let augmented = self.auto_augment.apply(&cropped, rng);

        let mut data = to_chw_float(&augmented);
        normalize(&mut data, &NORMALIZE_MEAN, &NORMALIZE_STD);

        if self.random_erasing_p > 0.0 {
            let side = self.crop_size as usize;
            random_erasing(&mut data, side, side, self.random_erasing_p, rng);
        }
        data
    }
}

/// Deterministic validation pipeline
#[derive(Debug, Clone, Copy)]
pub struct ValTransform {
    resize_size: u32,
    crop_size: u32,
}

impl ValTransform {
    pub fn new(resize_size: u32, crop_size: u32) -> Self {
        Self { resize_size, crop_size }
    }

    pub fn apply(&self, image: &RgbImage) -> Vec<f32> {
        let resized = resize_shorter_side(image, self.resize_size);
        let cropped = center_crop(&resized, self.crop_size);
        let mut data = to_chw_float(&cropped);
        normalize(&mut data, &NORMALIZE_MEAN, &NORMALIZE_STD);
        data
    }
}

/// Pipeline selected by data split
#[derive(Debug, Clone)]
pub enum ImageTransform {
    Train(TrainTransform),
    Val(ValTransform),
}

impl ImageTransform {
    /// Builds the pipeline for `split` from the data and augmentation settings.
    pub fn for_split(split: DataSplit, data: &DataConfig, augmentation: &AugmentationConfig) -> Self {
        match split {
            DataSplit::Train => ImageTransform::Train(TrainTransform::new(
                data.train_crop_size,
                augmentation.random_erasing_p,
            )),
            DataSplit::Validation => {
                ImageTransform::Val(ValTransform::new(data.val_resize_size, data.val_crop_size))
            }
        }
    }

    /// Side length of the square output
    pub fn output_size(&self) -> usize {
        match self {
            ImageTransform::Train(t) => t.crop_size as usize,
            ImageTransform::Val(t) => t.crop_size as usize,
        }
    }

    pub fn apply<R: Rng + ?Sized>(&self, image: &RgbImage, rng: &mut R) -> Vec<f32> {
        match self {
            ImageTransform::Train(t) => t.apply(image, rng),
            ImageTransform::Val(t) => t.apply(image),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_image() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 77]))
    }

    #[test]
    fn test_train_output_shape_and_range() {
        let transform = TrainTransform::new(32, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let out = transform.apply(&sample_image(), &mut rng);
        assert_eq!(out.len(), 3 * 32 * 32);
        assert!(out.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_train_is_reproducible_for_seed() {
        let transform = TrainTransform::new(24, 0.5);
        let image = sample_image();
        let a = transform.apply(&image, &mut ChaCha8Rng::seed_from_u64(9));
        let b = transform.apply(&image, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_val_is_deterministic() {
        let transform = ValTransform::new(40, 32);
        let image = sample_image();
        let a = transform.apply(&image);
        let b = transform.apply(&image);
        assert_eq!(a.len(), 3 * 32 * 32);
        assert_eq!(a, b);
    }

    #[test]
    fn test_for_split_uses_configured_sizes() {
        let data = DataConfig {
            train_crop_size: 16,
            val_resize_size: 20,
            val_crop_size: 18,
            ..DataConfig::default()
        };
        let augmentation = AugmentationConfig::default();

        let train = ImageTransform::for_split(DataSplit::Train, &data, &augmentation);
        let val = ImageTransform::for_split(DataSplit::Validation, &data, &augmentation);
        assert_eq!(train.output_size(), 16);
        assert_eq!(val.output_size(), 18);

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(val.apply(&sample_image(), &mut rng).len(), 3 * 18 * 18);
    }
}
