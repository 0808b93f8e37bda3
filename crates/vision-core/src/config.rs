//! Configuration structures for classifier training.
//!
//! Every field has a default matching the reference recipe, so a TOML file
//! only needs to name the dataset directories and the class count.

use crate::error::{Error, Result};
use crate::types::OptimizerKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a training job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Model configuration
    pub model: ModelConfig,
    /// Dataset and loader configuration
    pub data: DataConfig,
    /// Augmentation parameters
    pub augmentation: AugmentationConfig,
    /// Optimizer and schedule hyperparameters
    pub optim: OptimConfig,
    /// Total number of training epochs
    pub epochs: usize,
    /// Random seed for shuffling and mixing
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            data: DataConfig::default(),
            augmentation: AugmentationConfig::default(),
            optim: OptimConfig::default(),
            epochs: 100,
            seed: 42,
        }
    }
}

impl ClassifierConfig {
    /// Checks every structural constraint; called once before anything is built.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.data.validate()?;
        self.augmentation.validate()?;
        self.optim.validate()?;

        if self.epochs == 0 {
            return Err(Error::Config("epochs must be greater than 0".into()));
        }
        if self.optim.warmup_epochs >= self.epochs {
            return Err(Error::Config(format!(
                "warmup_epochs ({}) must be smaller than epochs ({})",
                self.optim.warmup_epochs, self.epochs
            )));
        }
        Ok(())
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Registered backbone variant name, e.g. `resnet18`
    pub backbone: String,
    /// Number of output classes
    pub num_classes: usize,
    /// Whether to load pretrained backbone weights
    pub pretrained: bool,
    /// Where pretrained weight sets are fetched from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightSourceConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backbone: "resnet18".to_string(),
            num_classes: 1000,
            pretrained: false,
            weights: None,
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(Error::Config("num_classes must be greater than 0".into()));
        }
        if self.backbone.trim().is_empty() {
            return Err(Error::Config("backbone name must not be empty".into()));
        }
        Ok(())
    }
}

/// Location of pretrained weight sets: `<base_url>/<variant>.mpk`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightSourceConfig {
    /// Base URL the per-variant files live under
    pub base_url: String,
    /// Local directory downloaded files are cached in
    #[serde(default = "default_weight_cache")]
    pub cache_dir: PathBuf,
    /// Number of download attempts before giving up
    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: usize,
}

fn default_weight_cache() -> PathBuf {
    PathBuf::from(".cache/weights")
}

fn default_fetch_attempts() -> usize {
    3
}

/// Dataset and loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Training image folder (`<dir>/<class>/<image>`)
    pub train_dir: PathBuf,
    /// Validation image folder
    pub val_dir: PathBuf,
    /// Batch size for both loaders
    pub batch_size: usize,
    /// Loader worker threads
    pub num_workers: usize,
    /// Output side of the random resized crop
    pub train_crop_size: u32,
    /// Shorter side after the validation resize
    pub val_resize_size: u32,
    /// Output side of the validation center crop
    pub val_crop_size: u32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/train"),
            val_dir: PathBuf::from("data/val"),
            batch_size: 128,
            num_workers: 4,
            train_crop_size: 176,
            val_resize_size: 232,
            val_crop_size: 224,
        }
    }
}

impl DataConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".into()));
        }
        for (name, value) in [
            ("train_crop_size", self.train_crop_size),
            ("val_resize_size", self.val_resize_size),
            ("val_crop_size", self.val_crop_size),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }
}

/// Data augmentation configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Probability of random erasing; `0` removes the step
    pub random_erasing_p: f64,
    /// Beta concentration for mixup
    pub mixup_alpha: f64,
    /// Beta concentration for cutmix
    pub cutmix_alpha: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            random_erasing_p: 0.1,
            mixup_alpha: 0.2,
            cutmix_alpha: 1.0,
        }
    }
}

impl AugmentationConfig {
    /// Mixed-sample augmentation only runs when both alphas are positive.
    pub fn mixing_enabled(&self) -> bool {
        self.mixup_alpha > 0.0 && self.cutmix_alpha > 0.0
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.random_erasing_p) {
            return Err(Error::Config(format!(
                "random_erasing_p must be in [0, 1], got {}",
                self.random_erasing_p
            )));
        }
        for (name, alpha) in [
            ("mixup_alpha", self.mixup_alpha),
            ("cutmix_alpha", self.cutmix_alpha),
        ] {
            if !alpha.is_finite() || alpha < 0.0 {
                return Err(Error::Config(format!(
                    "{name} must be a non-negative number, got {alpha}"
                )));
            }
        }
        Ok(())
    }
}

/// Optimizer and learning-rate schedule hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    /// Optimizer family name: `SGD`, `Adam`, `AdamW` or `RMSprop`
    pub optimizer: String,
    /// Base learning rate
    pub lr: f64,
    /// Weight decay for non-normalization parameters
    pub weight_decay: f64,
    /// Weight decay for normalization parameters; `"none"` disables grouping
    #[serde(with = "optional_decay")]
    pub norm_weight_decay: Option<f64>,
    /// Label smoothing applied to the validation loss
    pub label_smoothing: f64,
    /// Length of the linear warmup phase in epochs
    pub warmup_epochs: usize,
    /// Warmup start factor
    pub warmup_decay: f64,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            optimizer: "SGD".to_string(),
            lr: 0.05,
            weight_decay: 2e-5,
            norm_weight_decay: Some(0.0),
            label_smoothing: 0.1,
            warmup_epochs: 5,
            warmup_decay: 0.01,
        }
    }
}

impl OptimConfig {
    /// Resolves the optimizer name against the supported families.
    pub fn optimizer_kind(&self) -> Result<OptimizerKind> {
        self.optimizer.parse()
    }

    fn validate(&self) -> Result<()> {
        self.optimizer_kind()?;

        if !(self.lr > 0.0) {
            return Err(Error::Config(format!("lr must be positive, got {}", self.lr)));
        }
        if !(self.weight_decay >= 0.0) {
            return Err(Error::Config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if let Some(decay) = self.norm_weight_decay {
            if !(decay >= 0.0) {
                return Err(Error::Config(format!(
                    "norm_weight_decay must be non-negative, got {decay}"
                )));
            }
        }
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return Err(Error::Config(format!(
                "label_smoothing must be in [0, 1), got {}",
                self.label_smoothing
            )));
        }
        if !(self.warmup_decay > 0.0 && self.warmup_decay <= 1.0) {
            return Err(Error::Config(format!(
                "warmup_decay must be in (0, 1], got {}",
                self.warmup_decay
            )));
        }
        Ok(())
    }
}

/// `norm_weight_decay` is either a number or the string `"none"`.
mod optional_decay {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Value(f64),
        Keyword(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(decay) => Repr::Value(*decay),
            None => Repr::Keyword("none".to_string()),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Value(decay) => Ok(Some(decay)),
            Repr::Keyword(word) if word.eq_ignore_ascii_case("none") => Ok(None),
            Repr::Keyword(word) => Err(serde::de::Error::custom(format!(
                "expected a number or \"none\", got \"{word}\""
            ))),
        }
    }
}
