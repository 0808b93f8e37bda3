//! Batch-level mixup and cutmix producing soft label distributions.

use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use tracing::trace;
use vision_core::{AugmentationConfig, Error, Result};

/// Images with one soft label row per sample
#[derive(Debug, Clone)]
pub struct MixedBatch<B: Backend> {
    /// `[batch, channels, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch, num_classes]`, rows sum to 1
    pub targets: Tensor<B, 2>,
}

/// Axis-aligned box in pixel coordinates, half-open on the upper bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutmixBox {
    pub y1: usize,
    pub y2: usize,
    pub x1: usize,
    pub x2: usize,
}

impl CutmixBox {
    /// Box of nominal area `(1 - lam) * H * W` centered at `(cy, cx)`,
    /// clipped to the image.
    pub fn around(height: usize, width: usize, lam: f64, cy: usize, cx: usize) -> Self {
        let r = 0.5 * (1.0 - lam).max(0.0).sqrt();
        let half_w = (r * width as f64) as usize;
        let half_h = (r * height as f64) as usize;

        Self {
            y1: cy.saturating_sub(half_h),
            y2: (cy + half_h).min(height),
            x1: cx.saturating_sub(half_w),
            x2: (cx + half_w).min(width),
        }
    }

    pub fn area(&self) -> usize {
        (self.y2 - self.y1) * (self.x2 - self.x1)
    }

    /// Fraction of the image left untouched by the paste
    pub fn effective_lambda(&self, height: usize, width: usize) -> f64 {
        1.0 - self.area() as f64 / (height * width) as f64
    }

    fn mask(&self, height: usize, width: usize) -> Vec<f32> {
        let mut mask = vec![0.0f32; height * width];
        for y in self.y1..self.y2 {
            mask[y * width + self.x1..y * width + self.x2].fill(1.0);
        }
        mask
    }
}

/// Fails with `Error::Dataset` on the first label outside `0..num_classes`.
pub fn check_labels(labels: impl IntoIterator<Item = i64>, num_classes: usize) -> Result<()> {
    for label in labels {
        if label < 0 || label as usize >= num_classes {
            return Err(Error::Dataset(format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }
    }
    Ok(())
}

/// One-hot rows for integer class labels
pub fn one_hot<B: Backend>(labels: Tensor<B, 1, Int>, num_classes: usize) -> Result<Tensor<B, 2>> {
    let device = labels.device();
    let labels: Vec<i64> = labels.into_data().iter::<i64>().collect();
    check_labels(labels.iter().copied(), num_classes)?;
    let batch_size = labels.len();

    let mut rows = vec![0.0f32; batch_size * num_classes];
    for (i, &label) in labels.iter().enumerate() {
        rows[i * num_classes + label as usize] = 1.0;
    }
    Ok(Tensor::from_floats(TensorData::new(rows, [batch_size, num_classes]), &device))
}

/// Randomly applies mixup or cutmix (probability 1/2 each) to a batch.
///
/// Disabled unless both alphas are positive; a disabled mixer returns the
/// images unchanged with exact one-hot targets.
#[derive(Debug, Clone, Copy)]
pub struct MixupCutmix {
    num_classes: usize,
    mixup_alpha: f64,
    cutmix_alpha: f64,
}

impl MixupCutmix {
    pub fn new(num_classes: usize, config: &AugmentationConfig) -> Self {
        Self {
            num_classes,
            mixup_alpha: config.mixup_alpha,
            cutmix_alpha: config.cutmix_alpha,
        }
    }

    pub fn is_active(&self) -> bool {
        self.mixup_alpha > 0.0 && self.cutmix_alpha > 0.0
    }

    /// Labels outside `0..num_classes` are rejected before any mixing.
    pub fn apply<B: Backend, R: Rng + ?Sized>(
        &self,
        images: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
        rng: &mut R,
    ) -> Result<MixedBatch<B>> {
        let targets = one_hot(labels, self.num_classes)?;
        if !self.is_active() {
            return Ok(MixedBatch { images, targets });
        }

        Ok(if rng.gen_bool(0.5) {
            self.mixup(images, targets, rng)
        } else {
            self.cutmix(images, targets, rng)
        })
    }

    /// Convex combination of each sample with a randomly paired one.
    pub fn mixup<B: Backend, R: Rng + ?Sized>(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 2>,
        rng: &mut R,
    ) -> MixedBatch<B> {
        let lam = sample_lambda(self.mixup_alpha, rng);
        let (paired_images, paired_targets) = pair(&images, &targets, rng);
        trace!(lam, "mixup");

        MixedBatch {
            images: images.mul_scalar(lam).add(paired_images.mul_scalar(1.0 - lam)),
            targets: targets.mul_scalar(lam).add(paired_targets.mul_scalar(1.0 - lam)),
        }
    }

    /// Pastes a box from a randomly paired sample; labels use the area that
    /// actually survived clipping.
    pub fn cutmix<B: Backend, R: Rng + ?Sized>(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 2>,
        rng: &mut R,
    ) -> MixedBatch<B> {
        let [_, _, height, width] = images.dims();
        let lam = sample_lambda(self.cutmix_alpha, rng);
        let (paired_images, paired_targets) = pair(&images, &targets, rng);

        let cy = rng.gen_range(0..height);
        let cx = rng.gen_range(0..width);
        let cut = CutmixBox::around(height, width, lam, cy, cx);
        let lam = cut.effective_lambda(height, width);
        trace!(lam, ?cut, "cutmix");

        let mask = Tensor::<B, 4>::from_floats(
            TensorData::new(cut.mask(height, width), [1, 1, height, width]),
            &images.device(),
        );
        let keep = mask.clone().neg().add_scalar(1.0);

        MixedBatch {
            images: images.mul(keep).add(paired_images.mul(mask)),
            targets: targets.mul_scalar(lam).add(paired_targets.mul_scalar(1.0 - lam)),
        }
    }
}

fn sample_lambda<R: Rng + ?Sized>(alpha: f64, rng: &mut R) -> f64 {
    match Beta::new(alpha, alpha) {
        Ok(beta) => beta.sample(rng),
        Err(_) => 1.0,
    }
}

/// Random permutation pairing; a sample may be paired with itself.
fn pair<B: Backend, R: Rng + ?Sized>(
    images: &Tensor<B, 4>,
    targets: &Tensor<B, 2>,
    rng: &mut R,
) -> (Tensor<B, 4>, Tensor<B, 2>) {
    let batch_size = images.dims()[0];
    let mut order: Vec<i64> = (0..batch_size as i64).collect();
    order.shuffle(rng);

    let index = Tensor::<B, 1, Int>::from_data(TensorData::new(order, [batch_size]), &images.device());
    (
        images.clone().select(0, index.clone()),
        targets.clone().select(0, index),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray;

    fn batch(device: &<TestBackend as Backend>::Device) -> (Tensor<TestBackend, 4>, Tensor<TestBackend, 1, Int>) {
        let images = Tensor::<TestBackend, 4>::random(
            [4, 3, 8, 8],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            device,
        );
        let labels = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 1, 2, 1], [4]), device);
        (images, labels)
    }

    fn row_sums(targets: Tensor<TestBackend, 2>) -> Vec<f32> {
        targets.sum_dim(1).into_data().iter::<f32>().collect()
    }

    fn mixer(mixup_alpha: f64, cutmix_alpha: f64) -> MixupCutmix {
        MixupCutmix::new(
            3,
            &AugmentationConfig {
                random_erasing_p: 0.0,
                mixup_alpha,
                cutmix_alpha,
            },
        )
    }

    #[test]
    fn test_mixup_rows_sum_to_one() {
        let device = Default::default();
        let (images, labels) = batch(&device);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mixed = mixer(0.2, 1.0).mixup(images, one_hot(labels, 3).unwrap(), &mut rng);
        for sum in row_sums(mixed.targets) {
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_cutmix_rows_sum_to_one() {
        let device = Default::default();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..10 {
            let (images, labels) = batch(&device);
            let mixed = mixer(0.2, 1.0).cutmix(images, one_hot(labels, 3).unwrap(), &mut rng);
            assert_eq!(mixed.images.dims(), [4, 3, 8, 8]);
            for sum in row_sums(mixed.targets) {
                assert!((sum - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_disabled_mixer_is_identity() {
        let device = Default::default();
        let (images, labels) = batch(&device);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let mixed = mixer(0.0, 0.0).apply(images.clone(), labels, &mut rng).unwrap();
        mixed.images.into_data().assert_eq(&images.into_data(), true);

        let targets: Vec<f32> = mixed.targets.into_data().iter::<f32>().collect();
        assert_eq!(
            targets,
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_out_of_range_labels_are_rejected() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([3, 0], &device);
        assert!(matches!(one_hot(labels, 3), Err(Error::Dataset(_))));

        let labels = Tensor::<TestBackend, 1, Int>::from_ints([-1, 0], &device);
        assert!(matches!(one_hot(labels, 3), Err(Error::Dataset(_))));

        let (images, _) = batch(&device);
        let labels = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 1, 2, 5], [4]), &device);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        assert!(mixer(0.2, 1.0).apply(images, labels, &mut rng).is_err());
    }

    #[test]
    fn test_check_labels_accepts_full_range() {
        assert!(check_labels([0, 1, 2], 3).is_ok());
        assert!(check_labels(Vec::<i64>::new(), 0).is_ok());
        assert!(check_labels([2], 2).is_err());
    }

    #[test]
    fn test_one_alpha_zero_disables_mixing() {
        assert!(!mixer(0.2, 0.0).is_active());
        assert!(!mixer(0.0, 1.0).is_active());
        assert!(mixer(0.2, 1.0).is_active());
    }

    #[test]
    fn test_interior_box_keeps_nominal_lambda() {
        let cut = CutmixBox::around(100, 100, 0.75, 50, 50);
        assert_eq!(cut, CutmixBox { y1: 25, y2: 75, x1: 25, x2: 75 });
        assert!((cut.effective_lambda(100, 100) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_clipped_box_uses_clipped_area() {
        let cut = CutmixBox::around(100, 100, 0.75, 0, 0);
        assert_eq!(cut.area(), 625);
        let lam = cut.effective_lambda(100, 100);
        assert!((lam - 0.9375).abs() < 1e-12);
        assert!((lam - 0.75).abs() > 0.1);
    }

    #[test]
    fn test_degenerate_box_keeps_whole_image() {
        let cut = CutmixBox::around(8, 8, 1.0, 3, 3);
        assert_eq!(cut.area(), 0);
        assert_eq!(cut.effective_lambda(8, 8), 1.0);
    }
}
