//! Scalar metric reporting and per-epoch training history.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::Result;

/// Metric name for the per-step training loss
pub const TRAIN_LOSS: &str = "train/loss";
/// Metric name for the validation loss
pub const VAL_LOSS: &str = "val/loss";
/// Metric name for the validation top-1 accuracy
pub const VAL_ACC: &str = "val/acc";

/// Destination for named scalar observations.
///
/// Implementations decide where values go (console, file, remote); the
/// training core only emits them.
pub trait MetricsSink: Send {
    /// Record one observation of `name` at global `step`.
    fn log_scalar(&mut self, name: &str, value: f64, step: usize);
}

/// Emits every observation as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        info!(target: "metrics", metric = name, value, step);
    }
}

/// Keeps every observation in memory; useful for tests and summaries.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<(String, f64, usize)>,
}

impl MemorySink {
    /// Creates an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All values recorded under `name`, in emission order
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, v, _)| *v)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        self.records.push((name.to_string(), value, step));
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        (**self).log_scalar(name, value, step);
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        (**self).log_scalar(name, value, step);
    }
}

/// Epoch-level means collected over a training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Mean training loss per epoch
    pub train_loss: Vec<f64>,
    /// Mean validation loss per epoch
    pub val_loss: Vec<f64>,
    /// Validation accuracy per epoch
    pub val_accuracy: Vec<f64>,
    /// Learning rate used during each epoch
    pub learning_rate: Vec<f64>,
}

impl TrainingHistory {
    /// Number of completed epochs
    pub fn epochs(&self) -> usize {
        self.train_loss.len()
    }

    /// Highest validation accuracy so far
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.val_accuracy.iter().copied().reduce(f64::max)
    }

    /// Writes the history as pretty JSON; non-finite values become `null`.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Running mean of per-batch values, weighted by batch size.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    /// Adds a batch-level mean covering `n` samples
    pub fn update(&mut self, value: f64, n: usize) {
        self.sum += value * n as f64;
        self.count += n;
    }

    /// Weighted mean, NaN when nothing was recorded
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }
}
