//! Training infrastructure for image classifiers.
//!
//! This crate provides:
//! - Registered backbones (ResNet, Darknet, CSPDarknet) and pretrained weights
//! - The `ImageClassifier` model (backbone + linear head)
//! - Parameter grouping for normalization-specific weight decay
//! - Grouped optimizers and the warmup + cosine learning rate schedule
//! - Train / validation steps and the fit loop

pub mod backbone;
pub mod lr_schedule;
pub mod model;
pub mod optim;
pub mod params;
pub mod step;
pub mod trainer;
pub mod weights;

pub use backbone::{AnyBackbone, Backbone, BackboneOverrides, BackboneVariant};
pub use lr_schedule::{build_schedule, CosineAnnealing, LinearWarmup, LrSchedule, WarmupCosine};
pub use model::{ClassifierHead, ImageClassifier};
pub use optim::{build_optimizer, GroupOptimizer, GroupedOptimizer};
pub use params::{group_parameters, split_normalization_params, Describe, LayerKind, ModuleNode, ParamGroup};
pub use step::{soft_cross_entropy, top1_accuracy, train_step, valid_step};
pub use trainer::{EpochSummary, Trainer};
pub use weights::WeightSource;

/// Re-export commonly used types
pub mod prelude {
    pub use super::backbone::{AnyBackbone, Backbone, BackboneVariant};
    pub use super::lr_schedule::LrSchedule;
    pub use super::model::ImageClassifier;
    pub use super::params::Describe;
    pub use super::trainer::{EpochSummary, Trainer};
}
