//! Backbone contract and the variant registry.
//!
//! A backbone maps an image batch to a list of feature maps ordered from
//! shallow to deep. The registry resolves a variant name to a concrete
//! architecture and optionally loads pretrained weights for it.

pub mod blocks;
pub mod darknet;
pub mod resnet;

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use std::fmt;
use std::str::FromStr;
use tracing::info;
use vision_core::{Error, Result};

use crate::params::{Describe, ModuleNode};
use crate::weights::{load_checked, WeightSource};

pub use darknet::{Darknet, DARKNET_CHANNELS};
pub use resnet::{ResNet, RESNET_CHANNELS};

/// Multi-scale feature extractor.
///
/// `get_feature_maps` returns exactly `out_channels_list().len()` tensors of
/// shape `[batch, channels_i, h_i, w_i]`, the last being the deepest.
pub trait Backbone<B: Backend> {
    /// Channel count of each returned map, shallow to deep
    fn out_channels_list(&self) -> &[usize];

    /// Downsampling factor of the deepest map relative to the input
    fn stride(&self) -> usize;

    fn get_feature_maps(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>>;

    /// The deepest feature map
    ///
    /// # Panics
    ///
    /// Panics if `get_feature_maps` returns no maps, which breaks the
    /// trait's contract.
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.get_feature_maps(x)
            .pop()
            .expect("backbone produced no feature maps")
    }
}

/// Registered backbone presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackboneVariant {
    ResNet18,
    ResNet34,
    Darknet19,
    Darknet53,
    CspDarknet53,
}

/// Name table for [`BackboneVariant`]
const REGISTRY: [(&str, BackboneVariant, bool); 5] = [
    // (name, variant, pretrained weights registered)
    ("resnet18", BackboneVariant::ResNet18, true),
    ("resnet34", BackboneVariant::ResNet34, true),
    ("darknet19", BackboneVariant::Darknet19, true),
    ("darknet53", BackboneVariant::Darknet53, true),
    ("cspdarknet53", BackboneVariant::CspDarknet53, false),
];

impl BackboneVariant {
    pub const ALL: [BackboneVariant; 5] = [
        BackboneVariant::ResNet18,
        BackboneVariant::ResNet34,
        BackboneVariant::Darknet19,
        BackboneVariant::Darknet53,
        BackboneVariant::CspDarknet53,
    ];

    fn entry(self) -> (&'static str, BackboneVariant, bool) {
        REGISTRY
            .into_iter()
            .find(|(_, variant, _)| *variant == self)
            .unwrap_or(("unknown", self, false))
    }

    pub fn name(self) -> &'static str {
        self.entry().0
    }

    /// Whether a pretrained weight set is registered for this variant
    pub fn has_pretrained(self) -> bool {
        self.entry().2
    }
}

impl fmt::Display for BackboneVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackboneVariant {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        REGISTRY
            .into_iter()
            .find(|(key, _, _)| *key == name)
            .map(|(_, variant, _)| variant)
            .ok_or_else(|| Error::UnknownVariant(name.to_string()))
    }
}

/// Construction-time overrides for a backbone
#[derive(Debug, Clone)]
pub struct BackboneOverrides {
    /// Channels of the input images
    pub in_channels: usize,
    /// Where pretrained weights come from
    pub weights: Option<WeightSource>,
}

impl Default for BackboneOverrides {
    fn default() -> Self {
        Self {
            in_channels: 3,
            weights: None,
        }
    }
}

/// Any registered backbone
#[derive(Module, Debug)]
pub enum AnyBackbone<B: Backend> {
    ResNet(ResNet<B>),
    Darknet(Darknet<B>),
}

impl<B: Backend> AnyBackbone<B> {
    /// Builds the randomly initialized topology for `variant`
    pub fn new(variant: BackboneVariant, in_channels: usize, device: &B::Device) -> Self {
        match variant {
            BackboneVariant::ResNet18 => AnyBackbone::ResNet(ResNet::resnet18(in_channels, device)),
            BackboneVariant::ResNet34 => AnyBackbone::ResNet(ResNet::resnet34(in_channels, device)),
            BackboneVariant::Darknet19 => AnyBackbone::Darknet(Darknet::darknet19(in_channels, device)),
            BackboneVariant::Darknet53 => AnyBackbone::Darknet(Darknet::darknet53(in_channels, device)),
            BackboneVariant::CspDarknet53 => {
                AnyBackbone::Darknet(Darknet::cspdarknet53(in_channels, device))
            }
        }
    }

    /// Resolves `name` and builds the backbone, loading pretrained weights
    /// when requested.
    ///
    /// Unknown names fail with [`Error::UnknownVariant`] before anything is
    /// allocated. Requesting weights for a variant without a registered set,
    /// or without a weight source, is a configuration error.
    pub fn from_config(
        name: &str,
        pretrained: bool,
        overrides: &BackboneOverrides,
        device: &B::Device,
    ) -> Result<Self> {
        let variant: BackboneVariant = name.parse()?;

        let source = if pretrained {
            if !variant.has_pretrained() {
                return Err(Error::Config(format!(
                    "no pretrained weights registered for {variant}"
                )));
            }
            let source = overrides.weights.as_ref().ok_or_else(|| {
                Error::Config(format!(
                    "pretrained weights requested for {variant} but no weight source is configured"
                ))
            })?;
            Some(source)
        } else {
            None
        };

        let backbone = Self::new(variant, overrides.in_channels, device);
        info!(
            backbone = %variant,
            in_channels = overrides.in_channels,
            params = backbone.describe("").num_params(),
            "Built backbone"
        );

        match source {
            Some(source) => {
                let path = source.fetch(variant)?;
                backbone.load_weights(&path, device)
            }
            None => Ok(backbone),
        }
    }

    /// Loads a weight file recorded from the concrete architecture
    pub fn load_weights(self, path: &std::path::Path, device: &B::Device) -> Result<Self> {
        Ok(match self {
            AnyBackbone::ResNet(model) => AnyBackbone::ResNet(load_checked(model, path, device)?),
            AnyBackbone::Darknet(model) => AnyBackbone::Darknet(load_checked(model, path, device)?),
        })
    }
}

impl<B: Backend> Backbone<B> for AnyBackbone<B> {
    fn out_channels_list(&self) -> &[usize] {
        match self {
            AnyBackbone::ResNet(model) => model.out_channels_list(),
            AnyBackbone::Darknet(model) => model.out_channels_list(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            AnyBackbone::ResNet(model) => model.stride(),
            AnyBackbone::Darknet(model) => model.stride(),
        }
    }

    fn get_feature_maps(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        match self {
            AnyBackbone::ResNet(model) => model.get_feature_maps(x),
            AnyBackbone::Darknet(model) => model.get_feature_maps(x),
        }
    }
}

impl<B: Backend> Describe for AnyBackbone<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        match self {
            AnyBackbone::ResNet(model) => model.describe(name),
            AnyBackbone::Darknet(model) => model.describe(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn input(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        Tensor::random([1, 3, 64, 64], burn::tensor::Distribution::Default, device)
    }

    fn max_abs_diff(a: Tensor<TestBackend, 4>, b: Tensor<TestBackend, 4>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    struct Featureless;

    impl Backbone<TestBackend> for Featureless {
        fn out_channels_list(&self) -> &[usize] {
            &[]
        }

        fn stride(&self) -> usize {
            1
        }

        fn get_feature_maps(&self, _x: Tensor<TestBackend, 4>) -> Vec<Tensor<TestBackend, 4>> {
            Vec::new()
        }
    }

    #[test]
    #[should_panic(expected = "backbone produced no feature maps")]
    fn test_default_forward_panics_without_maps() {
        let device = Default::default();
        Featureless.forward(input(&device));
    }

    fn check_variant(variant: BackboneVariant) {
        let device = Default::default();
        let backbone = AnyBackbone::<TestBackend>::new(variant, 3, &device);
        let x = input(&device);

        let maps = backbone.get_feature_maps(x.clone());
        let channels = backbone.out_channels_list();
        assert_eq!(maps.len(), channels.len(), "{variant}");
        for (map, &expected) in maps.iter().zip(channels) {
            assert_eq!(map.dims()[0], 1);
            assert_eq!(map.dims()[1], expected, "{variant}");
        }

        let deepest = maps.last().unwrap().clone();
        assert_eq!(deepest.dims()[2], 64 / backbone.stride());

        let out = backbone.forward(x);
        assert!(max_abs_diff(out, deepest) < 1e-6, "{variant}");
    }

    #[test]
    fn test_resnet18_feature_maps() {
        check_variant(BackboneVariant::ResNet18);
    }

    #[test]
    fn test_resnet34_feature_maps() {
        check_variant(BackboneVariant::ResNet34);
    }

    #[test]
    fn test_darknet19_feature_maps() {
        check_variant(BackboneVariant::Darknet19);
    }

    #[test]
    fn test_darknet53_feature_maps() {
        check_variant(BackboneVariant::Darknet53);
    }

    #[test]
    fn test_cspdarknet53_feature_maps() {
        check_variant(BackboneVariant::CspDarknet53);
    }

    #[test]
    fn test_registry_names_roundtrip() {
        for variant in BackboneVariant::ALL {
            assert_eq!(variant.to_string().parse::<BackboneVariant>().unwrap(), variant);
        }
    }

    #[test]
    fn test_unknown_variant() {
        let device = Default::default();
        let err = AnyBackbone::<TestBackend>::from_config(
            "not_a_model",
            false,
            &BackboneOverrides::default(),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownVariant(name) if name == "not_a_model"));
    }

    #[test]
    fn test_pretrained_without_registered_weights() {
        let device = Default::default();
        let err = AnyBackbone::<TestBackend>::from_config(
            "cspdarknet53",
            true,
            &BackboneOverrides::default(),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_pretrained_without_source() {
        let device = Default::default();
        let err = AnyBackbone::<TestBackend>::from_config(
            "resnet18",
            true,
            &BackboneOverrides::default(),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_in_channels_override() {
        let device = Default::default();
        let overrides = BackboneOverrides {
            in_channels: 1,
            weights: None,
        };
        let backbone =
            AnyBackbone::<TestBackend>::from_config("darknet19", false, &overrides, &device).unwrap();
        let x = Tensor::<TestBackend, 4>::zeros([2, 1, 32, 32], &device);
        assert_eq!(backbone.forward(x).dims(), [2, 1024, 1, 1]);
    }

    #[test]
    fn test_pretrained_weights_from_local_source() {
        let device = Default::default();
        let remote = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        let reference = ResNet::<TestBackend>::resnet18(3, &device);
        reference
            .clone()
            .save_file(
                remote.path().join("resnet18"),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            )
            .unwrap();

        let overrides = BackboneOverrides {
            in_channels: 3,
            weights: Some(WeightSource::new(
                remote.path().to_string_lossy(),
                cache.path(),
                2,
            )),
        };
        let backbone =
            AnyBackbone::<TestBackend>::from_config("resnet18", true, &overrides, &device).unwrap();
        assert!(cache.path().join("resnet18.mpk").is_file());

        let x = input(&device);
        let expected = reference.forward(x.clone());
        assert!(max_abs_diff(backbone.forward(x), expected) < 1e-5);
    }

    #[test]
    fn test_missing_weights_fail_after_retries() {
        let device = Default::default();
        let remote = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let overrides = BackboneOverrides {
            in_channels: 3,
            weights: Some(WeightSource::new(remote.path().to_string_lossy(), cache.path(), 3)),
        };

        let err = AnyBackbone::<TestBackend>::from_config("darknet19", true, &overrides, &device)
            .unwrap_err();
        assert!(matches!(err, Error::WeightLoad(_)));
    }

    #[test]
    fn test_mismatched_record_is_weight_load_error() {
        let device = Default::default();
        let remote = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        Darknet::<TestBackend>::darknet19(3, &device)
            .save_file(
                remote.path().join("resnet18"),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            )
            .unwrap();

        let overrides = BackboneOverrides {
            in_channels: 3,
            weights: Some(WeightSource::new(remote.path().to_string_lossy(), cache.path(), 1)),
        };
        let err = AnyBackbone::<TestBackend>::from_config("resnet18", true, &overrides, &device)
            .unwrap_err();
        assert!(matches!(err, Error::WeightLoad(_)));
    }
}
