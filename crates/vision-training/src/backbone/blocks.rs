//! Convolution building blocks shared by the backbone families.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, LeakyRelu, LeakyReluConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::params::{Describe, ModuleNode};

const LEAKY_SLOPE: f64 = 0.1;

/// Bias-free convolution followed by batch norm, no activation.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    /// `kernel`×`kernel` convolution with "same" padding for odd kernels
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let pad = kernel / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

impl<B: Backend> Describe for ConvBn<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::composite(name, vec![self.conv.describe("conv"), self.bn.describe("bn")])
    }
}

/// Convolution, batch norm and leaky ReLU (slope 0.1), the Darknet unit.
#[derive(Module, Debug)]
pub struct ConvBnLeaky<B: Backend> {
    pub inner: ConvBn<B>,
    pub activation: LeakyRelu,
}

impl<B: Backend> ConvBnLeaky<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            inner: ConvBn::new(in_channels, out_channels, kernel, stride, device),
            activation: LeakyReluConfig::new().with_negative_slope(LEAKY_SLOPE).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.activation.forward(self.inner.forward(x))
    }
}

impl<B: Backend> Describe for ConvBnLeaky<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::composite(name, vec![self.inner.describe("inner")])
    }
}

/// Bottleneck residual unit: 1x1 reduce to `hidden`, 3x3 back to `channels`.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub reduce: ConvBnLeaky<B>,
    pub expand: ConvBnLeaky<B>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(channels: usize, hidden: usize, device: &B::Device) -> Self {
        Self {
            reduce: ConvBnLeaky::new(channels, hidden, 1, 1, device),
            expand: ConvBnLeaky::new(hidden, channels, 3, 1, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = self.expand.forward(self.reduce.forward(x.clone()));
        x + residual
    }
}

impl<B: Backend> Describe for ResidualBlock<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::composite(
            name,
            vec![self.reduce.describe("reduce"), self.expand.describe("expand")],
        )
    }
}

/// Describes a list of modules as children named by index.
pub(crate) fn describe_list<T: Describe>(name: &str, items: &[T]) -> ModuleNode {
    ModuleNode::composite(
        name,
        items
            .iter()
            .enumerate()
            .map(|(i, item)| item.describe(&i.to_string()))
            .collect(),
    )
}
