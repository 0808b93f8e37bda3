//! ResNet backbones built from basic residual blocks.

use burn::{
    module::Module,
    nn::{
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::blocks::{describe_list, ConvBn};
use super::Backbone;
use crate::params::{Describe, ModuleNode};

/// Channels of the four stage outputs
pub const RESNET_CHANNELS: [usize; 4] = [64, 128, 256, 512];

/// Two 3x3 convolutions with an identity or projected shortcut.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvBn<B>,
    conv2: ConvBn<B>,
    downsample: Option<ConvBn<B>>,
    relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| ConvBn::new(in_channels, out_channels, 1, stride, device));

        Self {
            conv1: ConvBn::new(in_channels, out_channels, 3, stride, device),
            conv2: ConvBn::new(out_channels, out_channels, 3, 1, device),
            downsample,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.conv1.forward(x));
        let out = self.conv2.forward(out);
        self.relu.forward(out + identity)
    }
}

impl<B: Backend> Describe for BasicBlock<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        let mut children = vec![self.conv1.describe("conv1"), self.conv2.describe("conv2")];
        if let Some(downsample) = &self.downsample {
            children.push(downsample.describe("downsample"));
        }
        ModuleNode::composite(name, children)
    }
}

/// A run of basic blocks; the first one may change resolution and width.
#[derive(Module, Debug)]
pub struct ResNetStage<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> ResNetStage<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        num_blocks: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|i| {
                if i == 0 {
                    BasicBlock::new(in_channels, out_channels, stride, device)
                } else {
                    BasicBlock::new(out_channels, out_channels, 1, device)
                }
            })
            .collect();
        Self { blocks }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

impl<B: Backend> Describe for ResNetStage<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::composite(name, vec![describe_list("blocks", &self.blocks)])
    }
}

/// ResNet feature extractor without the classification head.
///
/// Stem: 7x7/2 convolution and 3x3/2 max pool. Four stages follow with
/// strides 1, 2, 2, 2, so the deepest map is 1/32 of the input.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: ConvBn<B>,
    relu: Relu,
    maxpool: MaxPool2d,
    stages: Vec<ResNetStage<B>>,
}

impl<B: Backend> ResNet<B> {
    /// Builds a ResNet with `layers[i]` basic blocks in stage `i`.
    pub fn new(layers: [usize; 4], in_channels: usize, device: &B::Device) -> Self {
        let stem = ConvBn::new(in_channels, RESNET_CHANNELS[0], 7, 2, device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut stages = Vec::with_capacity(layers.len());
        let mut in_ch = RESNET_CHANNELS[0];
        for (i, (&num_blocks, &out_ch)) in layers.iter().zip(RESNET_CHANNELS.iter()).enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            stages.push(ResNetStage::new(in_ch, out_ch, num_blocks, stride, device));
            in_ch = out_ch;
        }

        Self {
            stem,
            relu: Relu::new(),
            maxpool,
            stages,
        }
    }

    pub fn resnet18(in_channels: usize, device: &B::Device) -> Self {
        Self::new([2, 2, 2, 2], in_channels, device)
    }

    pub fn resnet34(in_channels: usize, device: &B::Device) -> Self {
        Self::new([3, 4, 6, 3], in_channels, device)
    }
}

impl<B: Backend> Backbone<B> for ResNet<B> {
    fn out_channels_list(&self) -> &[usize] {
        &RESNET_CHANNELS
    }

    fn stride(&self) -> usize {
        32
    }

    fn get_feature_maps(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let x = self.relu.forward(self.stem.forward(x));
        let mut x = self.maxpool.forward(x);

        let mut maps = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            x = stage.forward(x);
            maps.push(x.clone());
        }
        maps
    }
}

impl<B: Backend> Describe for ResNet<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::composite(
            name,
            vec![self.stem.describe("stem"), describe_list("stages", &self.stages)],
        )
    }
}
