//! Single training and validation steps.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;
use vision_core::Result;
use vision_data::{ImageBatch, MixupCutmix};

use crate::model::ImageClassifier;

/// Cross-entropy against soft target distributions, averaged over the batch.
pub fn soft_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    log_probs.mul(targets).sum_dim(1).neg().mean()
}

/// Fraction of rows whose arg-max matches the label
pub fn top1_accuracy<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> f64 {
    let batch_size = labels.dims()[0];
    if batch_size == 0 {
        return 0.0;
    }
    let predictions = logits.argmax(1).squeeze::<1>();
    let correct: i64 = predictions.equal(labels).int().sum().into_scalar().elem();
    correct as f64 / batch_size as f64
}

/// Loss of one training step, still attached to the autodiff graph
pub struct TrainStepOutput<B: AutodiffBackend> {
    pub loss: Tensor<B, 1>,
    pub loss_value: f64,
    pub batch_size: usize,
}

/// Mixes the batch and computes the soft-target loss.
///
/// Fails when a label is outside the mixer's class range.
pub fn train_step<B: AutodiffBackend, R: Rng + ?Sized>(
    model: &ImageClassifier<B>,
    batch: ImageBatch<B>,
    mixer: &MixupCutmix,
    rng: &mut R,
) -> Result<TrainStepOutput<B>> {
    let batch_size = batch.targets.dims()[0];
    let mixed = mixer.apply(batch.images, batch.targets, rng)?;

    let logits = model.forward(mixed.images);
    let loss = soft_cross_entropy(logits, mixed.targets);
    let loss_value: f64 = loss.clone().into_scalar().elem();

    Ok(TrainStepOutput {
        loss,
        loss_value,
        batch_size,
    })
}

/// Metrics of one validation step
#[derive(Debug, Clone, Copy)]
pub struct ValidStepOutput {
    pub loss: f64,
    pub accuracy: f64,
    pub batch_size: usize,
}

/// Forward pass with label-smoothed cross-entropy and top-1 accuracy.
pub fn valid_step<B: Backend>(
    model: &ImageClassifier<B>,
    batch: ImageBatch<B>,
    label_smoothing: f64,
) -> ValidStepOutput {
    let batch_size = batch.targets.dims()[0];
    let logits = model.forward(batch.images);

    let smoothing = (label_smoothing > 0.0).then_some(label_smoothing as f32);
    let loss = CrossEntropyLossConfig::new()
        .with_smoothing(smoothing)
        .init(&logits.device())
        .forward(logits.clone(), batch.targets.clone());

    ValidStepOutput {
        loss: loss.into_scalar().elem(),
        accuracy: top1_accuracy(logits, batch.targets),
        batch_size,
    }
}
