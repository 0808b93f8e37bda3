//! The fit loop.
//!
//! One synchronous pass per epoch: lazily built train batches, a mixed-sample
//! step and one grouped optimizer update per batch, then a validation pass on
//! the inner (non-autodiff) model. The schedule advances once per epoch.

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vision_core::{
    ClassifierConfig, DataSplit, MetricsSink, Result, RunningMean, TrainingHistory, TRAIN_LOSS,
    VAL_ACC, VAL_LOSS,
};
use vision_data::{check_labels, BatchLoader, ImageBatcher, ImageItem, MixupCutmix};

use crate::lr_schedule::build_schedule;
use crate::model::ImageClassifier;
use crate::optim::GroupedOptimizer;
use crate::params::{group_parameters, Describe};
use crate::step::{train_step, valid_step};

/// Means of one finished epoch
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EpochSummary {
    /// Zero-based epoch index
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Runs a training job described by a `ClassifierConfig`.
pub struct Trainer<B: AutodiffBackend> {
    config: ClassifierConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Validates `config` up front so a bad job fails before any batch is built.
    pub fn new(config: ClassifierConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, device })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Trains `model` for `config.epochs` epochs.
    ///
    /// `on_epoch` is called after every validation pass. A sample whose
    /// label does not fit the model head fails the run with `Error::Dataset`.
    pub fn fit<S, F>(
        &self,
        mut model: ImageClassifier<B>,
        train_loader: &BatchLoader<ImageItem>,
        val_loader: &BatchLoader<ImageItem>,
        mut sink: S,
        mut on_epoch: F,
    ) -> Result<(ImageClassifier<B>, TrainingHistory)>
    where
        S: MetricsSink,
        F: FnMut(&EpochSummary),
    {
        let config = &self.config;
        let optim = &config.optim;
        let kind = optim.optimizer_kind()?;

        let groups = group_parameters(&model.describe(""), optim.weight_decay, optim.norm_weight_decay);
        let mut optimizer = GroupedOptimizer::<ImageClassifier<B>, B>::new(kind, groups);
        let mut schedule = build_schedule(optim, config.epochs)?;

        let num_classes = model.num_classes();
        let mixer = MixupCutmix::new(num_classes, &config.augmentation);
        let train_batcher = ImageBatcher::for_split(DataSplit::Train, &config.data, &config.augmentation);
        let val_batcher = ImageBatcher::for_split(DataSplit::Validation, &config.data, &config.augmentation);
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        info!(
            epochs = config.epochs,
            train_batches = train_loader.num_batches(),
            val_batches = val_loader.num_batches(),
            mixing = mixer.is_active(),
            "Starting training"
        );

        let mut history = TrainingHistory::default();
        let mut global_step = 0usize;

        for epoch in 0..config.epochs {
            let lr = schedule.lr();
            let mut train_loss = RunningMean::default();

            for items in train_loader.iter_epoch(epoch) {
                check_labels(items.iter().map(|item| item.label as i64), num_classes)?;
                let batch = train_batcher.batch_with_rng::<B, _>(items, &mut rng, &self.device);
                let output = train_step(&model, batch, &mixer, &mut rng)?;

                if !output.loss_value.is_finite() {
                    warn!(epoch, step = global_step, loss = output.loss_value, "Non-finite training loss");
                }
                sink.log_scalar(TRAIN_LOSS, output.loss_value, global_step);
                train_loss.update(output.loss_value, output.batch_size);

                let grads = output.loss.backward();
                model = optimizer.step(lr, model, grads);
                global_step += 1;
            }

            let (val_loss, val_accuracy) = self.evaluate(&model, val_loader, &val_batcher)?;
            sink.log_scalar(VAL_LOSS, val_loss, global_step);
            sink.log_scalar(VAL_ACC, val_accuracy, global_step);

            let summary = EpochSummary {
                epoch,
                learning_rate: lr,
                train_loss: train_loss.mean(),
                val_loss,
                val_accuracy,
            };
            history.train_loss.push(summary.train_loss);
            history.val_loss.push(summary.val_loss);
            history.val_accuracy.push(summary.val_accuracy);
            history.learning_rate.push(summary.learning_rate);

            info!(
                "Epoch {}/{}: lr={:.6}, train_loss={:.4}, val_loss={:.4}, val_acc={:.4}",
                epoch + 1,
                config.epochs,
                lr,
                summary.train_loss,
                val_loss,
                val_accuracy
            );
            on_epoch(&summary);
            schedule.step();
        }

        if let Some(best) = history.best_val_accuracy() {
            info!(best_val_accuracy = best, "Training finished");
        }
        Ok((model, history))
    }

    /// Mean validation loss and top-1 accuracy, weighted by batch size.
    pub fn evaluate(
        &self,
        model: &ImageClassifier<B>,
        loader: &BatchLoader<ImageItem>,
        batcher: &ImageBatcher,
    ) -> Result<(f64, f64)> {
        let num_classes = model.num_classes();
        let inner = model.clone().valid();
        let mut loss = RunningMean::default();
        let mut accuracy = RunningMean::default();

        for items in loader.iter_epoch(0) {
            check_labels(items.iter().map(|item| item.label as i64), num_classes)?;
            let batch = batcher.batch_with_rng::<B::InnerBackend, _>(items, &mut rand::thread_rng(), &self.device);
            let output = valid_step(&inner, batch, self.config.optim.label_smoothing);
            loss.update(output.loss, output.batch_size);
            accuracy.update(output.accuracy, output.batch_size);
        }
        debug!(val_loss = loss.mean(), val_acc = accuracy.mean(), "Validation pass");

        Ok((loss.mean(), accuracy.mean()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::{AnyBackbone, BackboneVariant};
    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataset::Dataset;
    use image::{Rgb, RgbImage};
    use std::sync::Arc;
    use tempfile::TempDir;
    use vision_core::{AugmentationConfig, DataConfig, Error, MemorySink, OptimConfig};
    use vision_data::ImageFolderDataset;

    type TestBackend = Autodiff<NdArray>;

    fn image_folder(per_class: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (label, class) in ["cat", "dog"].iter().enumerate() {
            let class_dir = dir.path().join(class);
            std::fs::create_dir_all(&class_dir).unwrap();
            for i in 0..per_class {
                let shade = (label * 200 + i * 10) as u8;
                RgbImage::from_pixel(40, 48, Rgb([shade, 255 - shade, 64]))
                    .save(class_dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }
        dir
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            data: DataConfig {
                batch_size: 2,
                num_workers: 2,
                train_crop_size: 32,
                val_resize_size: 36,
                val_crop_size: 32,
                ..DataConfig::default()
            },
            optim: OptimConfig {
                lr: 0.01,
                warmup_epochs: 1,
                ..OptimConfig::default()
            },
            augmentation: AugmentationConfig::default(),
            epochs: 2,
            seed: 7,
            ..ClassifierConfig::default()
        }
    }

    fn loader(dir: &TempDir, batch_size: usize) -> BatchLoader<ImageItem> {
        let dataset: Arc<dyn Dataset<ImageItem>> = Arc::new(ImageFolderDataset::new(dir.path()).unwrap());
        BatchLoader::new(dataset, batch_size)
    }

    #[test]
    fn test_fit_records_history_and_metrics() {
        let dir = image_folder(2);
        let device = Default::default();
        let trainer = Trainer::<TestBackend>::new(config(), device).unwrap();

        let backbone = AnyBackbone::new(BackboneVariant::ResNet18, 3, &device);
        let model = ImageClassifier::new(backbone, 2, &device);
        let train = loader(&dir, 2).shuffle(7).num_workers(2);
        let val = loader(&dir, 3);

        let mut sink = MemorySink::new();
        let mut seen = Vec::new();
        let (_model, history) = trainer
            .fit(model, &train, &val, &mut sink, |summary| seen.push(summary.epoch))
            .unwrap();

        assert_eq!(seen, vec![0, 1]);
        assert_eq!(history.epochs(), 2);
        assert_eq!(sink.values(TRAIN_LOSS).len(), 4);
        assert_eq!(sink.values(VAL_LOSS).len(), 2);

        // Epoch 0 runs at the warmup start factor, epoch 1 at the full rate.
        assert!((history.learning_rate[0] - 0.01 * 0.01).abs() < 1e-12);
        assert!((history.learning_rate[1] - 0.01).abs() < 1e-12);

        for accuracy in sink.values(VAL_ACC) {
            assert!((0.0..=1.0).contains(&accuracy));
        }
    }

    #[test]
    fn test_evaluate_covers_every_sample() {
        let dir = image_folder(3);
        let device = Default::default();
        let trainer = Trainer::<TestBackend>::new(config(), device).unwrap();
        let backbone = AnyBackbone::new(BackboneVariant::ResNet18, 3, &device);
        let model = ImageClassifier::<TestBackend>::new(backbone, 2, &device);

        let batcher = ImageBatcher::for_split(DataSplit::Validation, &config().data, &config().augmentation);
        let (loss, accuracy) = trainer.evaluate(&model, &loader(&dir, 4), &batcher).unwrap();
        assert!(loss.is_finite());
        // 6 samples, so accuracy is a multiple of 1/6.
        let scaled = accuracy * 6.0;
        assert!((scaled - scaled.round()).abs() < 1e-9);
    }

    #[test]
    fn test_head_smaller_than_class_count_is_rejected() {
        let dir = image_folder(2);
        let device = Default::default();
        let trainer = Trainer::<TestBackend>::new(config(), device).unwrap();
        let backbone = AnyBackbone::new(BackboneVariant::ResNet18, 3, &device);
        let model = ImageClassifier::<TestBackend>::new(backbone, 1, &device);

        let err = trainer
            .fit(model, &loader(&dir, 2), &loader(&dir, 2), MemorySink::new(), |_| {})
            .err()
            .unwrap();
        assert!(matches!(err, Error::Dataset(_)));

        let backbone = AnyBackbone::new(BackboneVariant::ResNet18, 3, &device);
        let model = ImageClassifier::<TestBackend>::new(backbone, 1, &device);
        let batcher = ImageBatcher::for_split(DataSplit::Validation, &config().data, &config().augmentation);
        let err = trainer.evaluate(&model, &loader(&dir, 4), &batcher).err().unwrap();
        assert!(matches!(err, Error::Dataset(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut bad = config();
        bad.optim.warmup_epochs = 2;
        let err = Trainer::<TestBackend>::new(bad, Default::default()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
