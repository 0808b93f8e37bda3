//! Image classifier: a registered backbone plus a linear head.

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig,
    },
    tensor::{backend::Backend, Tensor},
};
use vision_core::{ModelConfig, Result};

use crate::backbone::{AnyBackbone, Backbone, BackboneOverrides};
use crate::params::{Describe, ModuleNode};
use crate::weights::WeightSource;

/// Global average pool, flatten and one linear layer
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(in_channels: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_channels, num_classes).init(device),
        }
    }

    /// `[batch, channels, h, w]` features to `[batch, num_classes]` logits
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(features);
        let x = x.flatten::<2>(1, 3);
        self.fc.forward(x)
    }
}

impl<B: Backend> Describe for ClassifierHead<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::composite(name, vec![self.fc.describe("fc")])
    }
}

/// Backbone and head trained as one module
#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    backbone: AnyBackbone<B>,
    head: ClassifierHead<B>,
    num_classes: usize,
}

impl<B: Backend> ImageClassifier<B> {
    /// Sizes the head from the backbone's deepest channel count.
    pub fn new(backbone: AnyBackbone<B>, num_classes: usize, device: &B::Device) -> Self {
        let features = backbone.out_channels_list().last().copied().unwrap_or_default();
        let head = ClassifierHead::new(features, num_classes, device);
        Self {
            backbone,
            head,
            num_classes,
        }
    }

    /// Builds the backbone named in `config` and attaches a fresh head.
    pub fn from_config(config: &ModelConfig, device: &B::Device) -> Result<Self> {
        let overrides = BackboneOverrides {
            in_channels: 3,
            weights: config.weights.as_ref().map(WeightSource::from),
        };
        let backbone = AnyBackbone::from_config(&config.backbone, config.pretrained, &overrides, device)?;
        Ok(Self::new(backbone, config.num_classes, device))
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    pub fn backbone(&self) -> &AnyBackbone<B> {
        &self.backbone
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<B: Backend> Describe for ImageClassifier<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::composite(
            name,
            vec![self.backbone.describe("backbone"), self.head.describe("head")],
        )
    }
}
