//! Darknet backbones: Darknet-19, Darknet-53 and CSPDarknet-53.
//!
//! All three share a 3x3 stem with 32 channels followed by five stages that
//! each halve the resolution, ending at 1024 channels and stride 32.

use burn::{
    module::Module,
    nn::pool::{MaxPool2d, MaxPool2dConfig},
    tensor::{backend::Backend, Tensor},
};

use super::blocks::{describe_list, ConvBnLeaky, ResidualBlock};
use super::Backbone;
use crate::params::{Describe, ModuleNode};

/// Channels of the five stage outputs
pub const DARKNET_CHANNELS: [usize; 5] = [64, 128, 256, 512, 1024];

const STEM_CHANNELS: usize = 32;

/// Residual blocks per Darknet-53 / CSPDarknet-53 stage
const DARKNET53_BLOCKS: [usize; 5] = [1, 2, 8, 8, 4];

/// `(kernel, out_channels)` per convolution of each Darknet-19 stage
const DARKNET19_LAYOUT: [&[(usize, usize)]; 5] = [
    &[(3, 64)],
    &[(3, 128), (1, 64), (3, 128)],
    &[(3, 256), (1, 128), (3, 256)],
    &[(3, 512), (1, 256), (3, 512), (1, 256), (3, 512)],
    &[(3, 1024), (1, 512), (3, 1024), (1, 512), (3, 1024)],
];

/// Max-pool downsampling then a plain stack of convolutions.
#[derive(Module, Debug)]
pub struct PlainStage<B: Backend> {
    pool: MaxPool2d,
    convs: Vec<ConvBnLeaky<B>>,
}

impl<B: Backend> PlainStage<B> {
    fn new(in_channels: usize, layout: &[(usize, usize)], device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(layout.len());
        let mut in_ch = in_channels;
        for &(kernel, out_ch) in layout {
            convs.push(ConvBnLeaky::new(in_ch, out_ch, kernel, 1, device));
            in_ch = out_ch;
        }

        Self {
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            convs,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.pool.forward(x);
        self.convs.iter().fold(x, |x, conv| conv.forward(x))
    }
}

/// Strided 3x3 downsampling then residual bottlenecks.
#[derive(Module, Debug)]
pub struct ResidualStage<B: Backend> {
    downsample: ConvBnLeaky<B>,
    blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResidualStage<B> {
    fn new(in_channels: usize, out_channels: usize, num_blocks: usize, device: &B::Device) -> Self {
        Self {
            downsample: ConvBnLeaky::new(in_channels, out_channels, 3, 2, device),
            blocks: (0..num_blocks)
                .map(|_| ResidualBlock::new(out_channels, out_channels / 2, device))
                .collect(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.downsample.forward(x);
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Cross-stage partial stage: half the channels go through the residual
/// blocks, the other half bypass them, and a 1x1 transition fuses both.
#[derive(Module, Debug)]
pub struct CspStage<B: Backend> {
    downsample: ConvBnLeaky<B>,
    split_main: ConvBnLeaky<B>,
    split_shortcut: ConvBnLeaky<B>,
    blocks: Vec<ResidualBlock<B>>,
    main_out: ConvBnLeaky<B>,
    transition: ConvBnLeaky<B>,
}

impl<B: Backend> CspStage<B> {
    fn new(in_channels: usize, out_channels: usize, num_blocks: usize, device: &B::Device) -> Self {
        let half = out_channels / 2;
        Self {
            downsample: ConvBnLeaky::new(in_channels, out_channels, 3, 2, device),
            split_main: ConvBnLeaky::new(out_channels, half, 1, 1, device),
            split_shortcut: ConvBnLeaky::new(out_channels, half, 1, 1, device),
            blocks: (0..num_blocks)
                .map(|_| ResidualBlock::new(half, half, device))
                .collect(),
            main_out: ConvBnLeaky::new(half, half, 1, 1, device),
            transition: ConvBnLeaky::new(2 * half, out_channels, 1, 1, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.downsample.forward(x);

        let main = self.split_main.forward(x.clone());
        let main = self.blocks.iter().fold(main, |x, block| block.forward(x));
        let main = self.main_out.forward(main);
        let shortcut = self.split_shortcut.forward(x);

        self.transition.forward(Tensor::cat(vec![main, shortcut], 1))
    }
}

/// One downsampling stage of a Darknet network
#[derive(Module, Debug)]
pub enum DarknetStage<B: Backend> {
    Plain(PlainStage<B>),
    Residual(ResidualStage<B>),
    Csp(CspStage<B>),
}

impl<B: Backend> DarknetStage<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            DarknetStage::Plain(stage) => stage.forward(x),
            DarknetStage::Residual(stage) => stage.forward(x),
            DarknetStage::Csp(stage) => stage.forward(x),
        }
    }
}

impl<B: Backend> Describe for DarknetStage<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        match self {
            DarknetStage::Plain(stage) => {
                ModuleNode::composite(name, vec![describe_list("convs", &stage.convs)])
            }
            DarknetStage::Residual(stage) => ModuleNode::composite(
                name,
                vec![
                    stage.downsample.describe("downsample"),
                    describe_list("blocks", &stage.blocks),
                ],
            ),
            DarknetStage::Csp(stage) => ModuleNode::composite(
                name,
                vec![
                    stage.downsample.describe("downsample"),
                    stage.split_main.describe("split_main"),
                    stage.split_shortcut.describe("split_shortcut"),
                    describe_list("blocks", &stage.blocks),
                    stage.main_out.describe("main_out"),
                    stage.transition.describe("transition"),
                ],
            ),
        }
    }
}

/// Darknet feature extractor
#[derive(Module, Debug)]
pub struct Darknet<B: Backend> {
    stem: ConvBnLeaky<B>,
    stages: Vec<DarknetStage<B>>,
}

impl<B: Backend> Darknet<B> {
    pub fn darknet19(in_channels: usize, device: &B::Device) -> Self {
        let mut stages = Vec::with_capacity(DARKNET19_LAYOUT.len());
        let mut in_ch = STEM_CHANNELS;
        for layout in DARKNET19_LAYOUT {
            stages.push(DarknetStage::Plain(PlainStage::new(in_ch, layout, device)));
            in_ch = layout[layout.len() - 1].1;
        }
        Self::with_stages(in_channels, stages, device)
    }

    pub fn darknet53(in_channels: usize, device: &B::Device) -> Self {
        let stages = Self::stage_widths()
            .map(|(i, in_ch, out_ch)| {
                DarknetStage::Residual(ResidualStage::new(in_ch, out_ch, DARKNET53_BLOCKS[i], device))
            })
            .collect();
        Self::with_stages(in_channels, stages, device)
    }

    pub fn cspdarknet53(in_channels: usize, device: &B::Device) -> Self {
        let stages = Self::stage_widths()
            .map(|(i, in_ch, out_ch)| {
                DarknetStage::Csp(CspStage::new(in_ch, out_ch, DARKNET53_BLOCKS[i], device))
            })
            .collect();
        Self::with_stages(in_channels, stages, device)
    }

    /// `(index, in_channels, out_channels)` for each of the five stages
    fn stage_widths() -> impl Iterator<Item = (usize, usize, usize)> {
        DARKNET_CHANNELS.into_iter().enumerate().map(|(i, out_ch)| {
            let in_ch = if i == 0 { STEM_CHANNELS } else { DARKNET_CHANNELS[i - 1] };
            (i, in_ch, out_ch)
        })
    }

    fn with_stages(in_channels: usize, stages: Vec<DarknetStage<B>>, device: &B::Device) -> Self {
        Self {
            stem: ConvBnLeaky::new(in_channels, STEM_CHANNELS, 3, 1, device),
            stages,
        }
    }
}

impl<B: Backend> Backbone<B> for Darknet<B> {
    fn out_channels_list(&self) -> &[usize] {
        &DARKNET_CHANNELS
    }

    fn stride(&self) -> usize {
        32
    }

    fn get_feature_maps(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut x = self.stem.forward(x);
        let mut maps = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            x = stage.forward(x);
            maps.push(x.clone());
        }
        maps
    }
}

impl<B: Backend> Describe for Darknet<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::composite(
            name,
            vec![self.stem.describe("stem"), describe_list("stages", &self.stages)],
        )
    }
}
