//! Learning rate scheduling.
//!
//! Schedules are stepped once per epoch and expose a multiplicative factor
//! on the base learning rate:
//! - Cosine annealing to zero
//! - Linear warmup from a start factor to 1
//! - Warmup followed by cosine, switching at a fixed milestone

use std::f64::consts::PI;
use vision_core::{Error, OptimConfig, Result};

/// Epoch-indexed learning rate schedule
pub trait LrSchedule: Send {
    /// Multiplier on the base learning rate at `epoch`
    fn factor(&self, epoch: usize) -> f64;

    fn base_lr(&self) -> f64;

    /// Epochs stepped so far
    fn epoch(&self) -> usize;

    /// Advance by one epoch (call at the end of each epoch)
    fn step(&mut self);

    /// Jump to `epoch`, e.g. when a job restarts
    fn resume(&mut self, epoch: usize);

    /// Learning rate for the current epoch
    fn lr(&self) -> f64 {
        self.base_lr() * self.factor(self.epoch())
    }
}

/// Cosine annealing from the base rate to 0 over `t_max` epochs.
#[derive(Debug, Clone)]
pub struct CosineAnnealing {
    base_lr: f64,
    t_max: usize,
    epoch: usize,
}

impl CosineAnnealing {
    pub fn new(base_lr: f64, t_max: usize) -> Self {
        Self {
            base_lr,
            t_max,
            epoch: 0,
        }
    }
}

impl LrSchedule for CosineAnnealing {
    fn factor(&self, epoch: usize) -> f64 {
        if self.t_max == 0 {
            return 1.0;
        }
        let progress = (epoch.min(self.t_max) as f64) / (self.t_max as f64);
        (1.0 + (progress * PI).cos()) / 2.0
    }

    fn base_lr(&self) -> f64 {
        self.base_lr
    }

    fn epoch(&self) -> usize {
        self.epoch
    }

    fn step(&mut self) {
        self.epoch += 1;
    }

    fn resume(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

/// Linear ramp of the factor from `start_factor` to 1 over `warmup_epochs`.
#[derive(Debug, Clone)]
pub struct LinearWarmup {
    base_lr: f64,
    start_factor: f64,
    warmup_epochs: usize,
    epoch: usize,
}

impl LinearWarmup {
    pub fn new(base_lr: f64, start_factor: f64, warmup_epochs: usize) -> Self {
        Self {
            base_lr,
            start_factor,
            warmup_epochs,
            epoch: 0,
        }
    }
}

impl LrSchedule for LinearWarmup {
    fn factor(&self, epoch: usize) -> f64 {
        if self.warmup_epochs == 0 {
            return 1.0;
        }
        let progress = (epoch.min(self.warmup_epochs) as f64) / (self.warmup_epochs as f64);
        self.start_factor + (1.0 - self.start_factor) * progress
    }

    fn base_lr(&self) -> f64 {
        self.base_lr
    }

    fn epoch(&self) -> usize {
        self.epoch
    }

    fn step(&mut self) {
        self.epoch += 1;
    }

    fn resume(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

/// Warmup until `milestone`, cosine afterwards.
///
/// The cosine phase starts its own clock at the milestone, so the factor is
/// exactly 1 at epoch `milestone`.
#[derive(Debug, Clone)]
pub struct WarmupCosine {
    warmup: LinearWarmup,
    cosine: CosineAnnealing,
    milestone: usize,
    epoch: usize,
}

impl WarmupCosine {
    pub fn new(warmup: LinearWarmup, cosine: CosineAnnealing) -> Self {
        let milestone = warmup.warmup_epochs;
        Self {
            warmup,
            cosine,
            milestone,
            epoch: 0,
        }
    }

    pub fn milestone(&self) -> usize {
        self.milestone
    }
}

impl LrSchedule for WarmupCosine {
    fn factor(&self, epoch: usize) -> f64 {
        if epoch < self.milestone {
            self.warmup.factor(epoch)
        } else {
            self.cosine.factor(epoch - self.milestone)
        }
    }

    fn base_lr(&self) -> f64 {
        self.cosine.base_lr
    }

    fn epoch(&self) -> usize {
        self.epoch
    }

    fn step(&mut self) {
        self.epoch += 1;
        if self.epoch <= self.milestone {
            self.warmup.step();
        } else {
            self.cosine.step();
        }
    }

    fn resume(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.warmup.resume(epoch.min(self.milestone));
        self.cosine.resume(epoch.saturating_sub(self.milestone));
    }
}

/// Builds the schedule for a run of `total_epochs`.
///
/// The cosine phase covers `total_epochs - warmup_epochs`; with no warmup
/// the bare cosine schedule is returned.
pub fn build_schedule(config: &OptimConfig, total_epochs: usize) -> Result<Box<dyn LrSchedule>> {
    if config.warmup_epochs >= total_epochs {
        return Err(Error::Config(format!(
            "warmup_epochs ({}) must be less than epochs ({})",
            config.warmup_epochs, total_epochs
        )));
    }

    let cosine = CosineAnnealing::new(config.lr, total_epochs - config.warmup_epochs);
    if config.warmup_epochs == 0 {
        return Ok(Box::new(cosine));
    }

    let warmup = LinearWarmup::new(config.lr, config.warmup_decay, config.warmup_epochs);
    Ok(Box::new(WarmupCosine::new(warmup, cosine)))
}
