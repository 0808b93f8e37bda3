//! Parameter description and weight-decay grouping.
//!
//! Modules describe themselves as an owned [`ModuleNode`] tree. Grouping
//! walks that tree and splits trainable parameters into normalization
//! parameters and everything else so the two sets can use different weight
//! decay.

use burn::module::{Param, ParamId};
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Linear};
use burn::prelude::*;
use tracing::debug;

/// Layer category used for grouping decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Conv,
    Linear,
    BatchNorm,
    LayerNorm,
    GroupNorm,
    /// A container of other layers
    Composite,
}

impl LayerKind {
    pub fn is_norm(self) -> bool {
        matches!(self, LayerKind::BatchNorm | LayerKind::LayerNorm | LayerKind::GroupNorm)
    }
}

/// One parameter tensor owned directly by a module
#[derive(Debug, Clone)]
pub struct ParamEntry {
    pub id: ParamId,
    pub name: String,
    pub shape: Vec<usize>,
    /// Whether the parameter tracks gradients
    pub trainable: bool,
}

impl ParamEntry {
    pub fn from_param<B: Backend, const D: usize>(name: &str, param: &Param<Tensor<B, D>>) -> Self {
        let tensor = param.val();
        Self {
            id: param.id.clone(),
            name: name.to_string(),
            shape: tensor.dims().to_vec(),
            trainable: tensor.is_require_grad(),
        }
    }
}

/// A module and the parameters it owns, with its submodules as children.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub name: String,
    pub kind: LayerKind,
    pub params: Vec<ParamEntry>,
    pub children: Vec<ModuleNode>,
}

impl ModuleNode {
    pub fn leaf(name: impl Into<String>, kind: LayerKind, params: Vec<ParamEntry>) -> Self {
        Self {
            name: name.into(),
            kind,
            params,
            children: Vec::new(),
        }
    }

    pub fn composite(name: impl Into<String>, children: Vec<ModuleNode>) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Composite,
            params: Vec::new(),
            children,
        }
    }

    /// Adds parameters owned directly by a composite
    pub fn with_params(mut self, params: Vec<ParamEntry>) -> Self {
        self.params = params;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Every parameter with its dotted path, depth first.
    pub fn named_params(&self) -> Vec<(String, &ParamEntry)> {
        let mut out = Vec::new();
        self.collect_named("", &mut out);
        out
    }

    fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a ParamEntry)>) {
        let path = join_path(prefix, &self.name);
        for param in &self.params {
            out.push((join_path(&path, &param.name), param));
        }
        for child in &self.children {
            child.collect_named(&path, out);
        }
    }

    /// `(path, shape)` of every parameter, used to compare architectures
    pub fn param_shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.named_params()
            .into_iter()
            .map(|(path, param)| (path, param.shape.clone()))
            .collect()
    }

    pub fn num_params(&self) -> usize {
        self.named_params()
            .iter()
            .map(|(_, param)| param.shape.iter().product::<usize>())
            .sum()
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    match (prefix.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}.{name}"),
    }
}

/// Produces the description tree of a module.
pub trait Describe {
    fn describe(&self, name: &str) -> ModuleNode;
}

impl<B: Backend> Describe for Conv2d<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        let mut params = vec![ParamEntry::from_param("weight", &self.weight)];
        if let Some(bias) = &self.bias {
            params.push(ParamEntry::from_param("bias", bias));
        }
        ModuleNode::leaf(name, LayerKind::Conv, params)
    }
}

impl<B: Backend> Describe for Linear<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        let mut params = vec![ParamEntry::from_param("weight", &self.weight)];
        if let Some(bias) = &self.bias {
            params.push(ParamEntry::from_param("bias", bias));
        }
        ModuleNode::leaf(name, LayerKind::Linear, params)
    }
}

impl<B: Backend> Describe for BatchNorm<B> {
    fn describe(&self, name: &str) -> ModuleNode {
        ModuleNode::leaf(
            name,
            LayerKind::BatchNorm,
            vec![
                ParamEntry::from_param("gamma", &self.gamma),
                ParamEntry::from_param("beta", &self.beta),
            ],
        )
    }
}

/// Named parameter set with one weight-decay coefficient
#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub name: &'static str,
    pub weight_decay: f64,
    pub params: Vec<ParamId>,
}

/// Splits trainable parameters into `(norm, other)`.
///
/// Leaves of a normalization kind contribute to `norm`, all other leaves to
/// `other`. Parameters held directly by a composite go to `other`; its
/// children are visited on their own.
pub fn split_normalization_params(root: &ModuleNode) -> (Vec<ParamId>, Vec<ParamId>) {
    let mut norm = Vec::new();
    let mut other = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        let trainable = node.params.iter().filter(|p| p.trainable).map(|p| p.id.clone());
        if node.is_leaf() && node.kind.is_norm() {
            norm.extend(trainable);
        } else {
            other.extend(trainable);
        }
        stack.extend(node.children.iter().rev());
    }

    (norm, other)
}

/// Builds optimizer groups.
///
/// With `norm_weight_decay = None` every trainable parameter goes into one
/// group using `weight_decay`. Empty groups are dropped.
pub fn group_parameters(
    root: &ModuleNode,
    weight_decay: f64,
    norm_weight_decay: Option<f64>,
) -> Vec<ParamGroup> {
    let (norm, other) = split_normalization_params(root);

    let groups = match norm_weight_decay {
        None => {
            let mut all = other;
            all.extend(norm);
            vec![ParamGroup {
                name: "all",
                weight_decay,
                params: all,
            }]
        }
        Some(norm_decay) => vec![
            ParamGroup {
                name: "norm",
                weight_decay: norm_decay,
                params: norm,
            },
            ParamGroup {
                name: "other",
                weight_decay,
                params: other,
            },
        ],
    };

    let groups: Vec<ParamGroup> = groups.into_iter().filter(|g| !g.params.is_empty()).collect();
    for group in &groups {
        debug!(
            group = group.name,
            params = group.params.len(),
            weight_decay = group.weight_decay,
            "Parameter group"
        );
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::conv::Conv2dConfig;
    use burn::nn::{BatchNormConfig, LinearConfig};
    use std::collections::HashSet;

    type TestBackend = Autodiff<NdArray>;

    fn entry(name: &str, trainable: bool) -> ParamEntry {
        ParamEntry {
            id: ParamId::new(),
            name: name.to_string(),
            shape: vec![4],
            trainable,
        }
    }

    fn ids(entries: &[&ParamEntry]) -> Vec<ParamId> {
        entries.iter().map(|e| e.id.clone()).collect()
    }

    fn as_set(ids: Vec<ParamId>) -> HashSet<ParamId> {
        ids.into_iter().collect()
    }

    #[test]
    fn test_norm_leaves_go_to_norm_group() {
        let bn = ModuleNode::leaf("bn", LayerKind::BatchNorm, vec![entry("gamma", true), entry("beta", true)]);
        let ln = ModuleNode::leaf("ln", LayerKind::LayerNorm, vec![entry("gamma", true)]);
        let gn = ModuleNode::leaf("gn", LayerKind::GroupNorm, vec![entry("gamma", true)]);
        let conv = ModuleNode::leaf("conv", LayerKind::Conv, vec![entry("weight", true)]);
        let expected_norm = ids(&[&bn.params[0], &bn.params[1], &ln.params[0], &gn.params[0]]);
        let expected_other = ids(&[&conv.params[0]]);

        let root = ModuleNode::composite("", vec![conv, bn, ln, gn]);
        let (norm, other) = split_normalization_params(&root);

        assert_eq!(as_set(norm), as_set(expected_norm));
        assert_eq!(as_set(other), as_set(expected_other));
    }

    #[test]
    fn test_composite_direct_params_are_other() {
        let bn = ModuleNode::leaf("bn", LayerKind::BatchNorm, vec![entry("gamma", true)]);
        let own = entry("scale", true);
        let own_id = own.id.clone();
        let root = ModuleNode::composite("block", vec![bn]).with_params(vec![own]);

        let (norm, other) = split_normalization_params(&root);
        assert_eq!(norm.len(), 1);
        assert_eq!(as_set(other), as_set(vec![own_id]));
    }

    #[test]
    fn test_frozen_params_are_skipped() {
        let conv = ModuleNode::leaf("conv", LayerKind::Conv, vec![entry("weight", false), entry("bias", true)]);
        let (norm, other) = split_normalization_params(&conv);
        assert!(norm.is_empty());
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_no_norm_decay_gives_one_flat_group() {
        let root = ModuleNode::composite(
            "",
            vec![
                ModuleNode::leaf("conv", LayerKind::Conv, vec![entry("weight", true)]),
                ModuleNode::leaf("bn", LayerKind::BatchNorm, vec![entry("gamma", true), entry("beta", true)]),
            ],
        );

        let groups = group_parameters(&root, 2e-5, None);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].params.len(), 3);
        assert_eq!(groups[0].weight_decay, 2e-5);
    }

    #[test]
    fn test_empty_groups_are_dropped() {
        let root = ModuleNode::leaf("fc", LayerKind::Linear, vec![entry("weight", true)]);
        let groups = group_parameters(&root, 1e-4, Some(0.0));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "other");
    }

    #[test]
    fn test_burn_layers_describe_their_params() {
        let device = Default::default();
        let conv = Conv2dConfig::new([3, 8], [3, 3]).init::<TestBackend>(&device);
        let bn = BatchNormConfig::new(8).init::<TestBackend>(&device);
        let fc = LinearConfig::new(8, 2).init::<TestBackend>(&device);

        let root = ModuleNode::composite(
            "",
            vec![conv.describe("conv"), bn.describe("bn"), fc.describe("fc")],
        );

        let shapes = root.param_shapes();
        assert_eq!(shapes[0], ("conv.weight".to_string(), vec![8, 3, 3, 3]));
        assert_eq!(shapes[2], ("bn.gamma".to_string(), vec![8]));
        assert_eq!(shapes[4], ("fc.weight".to_string(), vec![8, 2]));

        let groups = group_parameters(&root, 2e-5, Some(0.0));
        let norm = groups.iter().find(|g| g.name == "norm").unwrap();
        assert_eq!(
            as_set(norm.params.clone()),
            as_set(vec![bn.gamma.id.clone(), bn.beta.id.clone()])
        );
    }
}
