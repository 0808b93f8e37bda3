//! Optimizers over parameter groups.
//!
//! Each group gets its own burn optimizer configured with the group's weight
//! decay. A step splits the gradients by group and lets each optimizer
//! update only its own parameters.

use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{
    AdamConfig, AdamWConfig, GradientsParams, Optimizer, RmsPropConfig, SgdConfig,
};
use burn::tensor::backend::AutodiffBackend;
use tracing::info;
use vision_core::OptimizerKind;

use crate::params::ParamGroup;

const MOMENTUM: f64 = 0.9;

/// Object-safe view of a burn optimizer.
pub trait GroupOptimizer<M, B>: Send
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    fn step_group(&mut self, lr: f64, module: M, grads: GradientsParams) -> M;
}

impl<M, B, O> GroupOptimizer<M, B> for O
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
    O: Optimizer<M, B>,
{
    fn step_group(&mut self, lr: f64, module: M, grads: GradientsParams) -> M {
        self.step(lr, module, grads)
    }
}

fn weight_decay(penalty: f64) -> Option<WeightDecayConfig> {
    (penalty > 0.0).then(|| WeightDecayConfig::new(penalty as f32))
}

/// Creates a `kind` optimizer with the given weight decay.
///
/// SGD and RMSprop use momentum 0.9; SGD has no dampening.
pub fn build_optimizer<M, B>(kind: OptimizerKind, decay: f64) -> Box<dyn GroupOptimizer<M, B>>
where
    M: AutodiffModule<B> + 'static,
    B: AutodiffBackend,
{
    match kind {
        OptimizerKind::Sgd => Box::new(
            SgdConfig::new()
                .with_momentum(Some(
                    MomentumConfig::new()
                        .with_momentum(MOMENTUM)
                        .with_dampening(0.0)
                        .with_nesterov(false),
                ))
                .with_weight_decay(weight_decay(decay))
                .init::<B, M>(),
        ),
        OptimizerKind::Adam => Box::new(
            AdamConfig::new()
                .with_weight_decay(weight_decay(decay))
                .init::<B, M>(),
        ),
        OptimizerKind::AdamW => Box::new(
            AdamWConfig::new()
                .with_weight_decay(decay as f32)
                .init::<B, M>(),
        ),
        OptimizerKind::RmsProp => Box::new(
            RmsPropConfig::new()
                .with_momentum(MOMENTUM as f32)
                .with_weight_decay(weight_decay(decay))
                .init::<B, M>(),
        ),
    }
}

/// One optimizer per non-empty parameter group.
pub struct GroupedOptimizer<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    groups: Vec<(ParamGroup, Box<dyn GroupOptimizer<M, B>>)>,
}

impl<M, B> GroupedOptimizer<M, B>
where
    M: AutodiffModule<B> + 'static,
    B: AutodiffBackend,
{
    pub fn new(kind: OptimizerKind, groups: Vec<ParamGroup>) -> Self {
        let groups = groups
            .into_iter()
            .filter(|group| !group.params.is_empty())
            .map(|group| {
                info!(
                    optimizer = %kind,
                    group = group.name,
                    params = group.params.len(),
                    weight_decay = group.weight_decay,
                    "Optimizer group"
                );
                let optimizer = build_optimizer(kind, group.weight_decay);
                (group, optimizer)
            })
            .collect();
        Self { groups }
    }

    pub fn groups(&self) -> impl Iterator<Item = &ParamGroup> {
        self.groups.iter().map(|(group, _)| group)
    }

    /// Applies one update to every group from the raw autodiff gradients.
    pub fn step(&mut self, lr: f64, mut module: M, mut grads: B::Gradients) -> M {
        for (group, optimizer) in self.groups.iter_mut() {
            let group_grads = GradientsParams::from_params(&mut grads, &module, &group.params);
            module = optimizer.step_group(lr, module, group_grads);
        }
        module
    }
}
