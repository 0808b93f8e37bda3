//! Training CLI Tool
//!
//! Trains an image classifier from a TOML configuration, with command-line
//! overrides for the most commonly tuned hyperparameters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use burn::data::dataset::Dataset;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use vision_core::{load_toml_config, save_toml_config, setup_cli_logging, ClassifierConfig, TracingSink};
use vision_data::{BatchLoader, ImageFolderDataset, ImageItem};
use vision_training::{Describe, ImageClassifier, Trainer};

type TrainBackend = Autodiff<NdArray>;

/// Image classifier training tool
#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train an image classifier",
    long_about = "Train an image classifier with a registered backbone, TrivialAugment, \
                  mixup/cutmix, per-group weight decay and a warmup + cosine schedule."
)]
struct Args {
    /// Path to training configuration file (TOML); defaults are used when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output directory for hparams.toml and history.json
    #[arg(short, long, value_name = "DIR", default_value = "runs/latest")]
    output: PathBuf,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override learning rate
    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Override backbone name
    #[arg(long, value_name = "NAME")]
    backbone: Option<String>,

    /// Validate the configuration and build the model, then exit
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(path) => load_toml_config::<ClassifierConfig>(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ClassifierConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;
    print_config_summary(&config);

    let device = Default::default();
    let model = ImageClassifier::<TrainBackend>::from_config(&config.model, &device)
        .context("Failed to build model")?;
    info!(
        backbone = %config.model.backbone,
        params = model.describe("").num_params(),
        "Model ready"
    );

    if args.dry_run {
        info!("Configuration and model validated (dry run)");
        return Ok(());
    }

    let hparams_path = args.output.join("hparams.toml");
    save_toml_config(&config, &hparams_path).context("Failed to save hyperparameters")?;
    info!("Hyperparameters saved to: {}", hparams_path.display());

    let (train_loader, val_loader) = build_loaders(&config)?;

    let trainer = Trainer::<TrainBackend>::new(config.clone(), device)?;
    let progress = ProgressBar::new(config.epochs as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} epochs {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );

    let (_model, history) = trainer.fit(model, &train_loader, &val_loader, TracingSink, |summary| {
        progress.set_message(format!("val_acc={:.4}", summary.val_accuracy));
        progress.inc(1);
    })?;
    progress.finish_with_message("done");

    let history_path = args.output.join("history.json");
    history.save_json(&history_path).context("Failed to save training history")?;

    info!("Training Summary:");
    if let Some(best) = history.best_val_accuracy() {
        info!("  Best validation accuracy: {:.4}", best);
    }
    info!("  History: {}", history_path.display());

    Ok(())
}

fn apply_overrides(config: &mut ClassifierConfig, args: &Args) {
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        config.optim.lr = lr;
    }
    if let Some(batch_size) = args.batch_size {
        config.data.batch_size = batch_size;
    }
    if let Some(ref backbone) = args.backbone {
        config.model.backbone = backbone.clone();
    }
}

fn print_config_summary(config: &ClassifierConfig) {
    info!("Configuration Summary:");
    info!("  Backbone: {} (pretrained: {})", config.model.backbone, config.model.pretrained);
    info!("  Classes: {}", config.model.num_classes);
    info!("  Epochs: {}", config.epochs);
    info!("  Batch size: {}", config.data.batch_size);
    info!("  Optimizer: {} (lr {})", config.optim.optimizer, config.optim.lr);
    info!(
        "  Weight decay: {} (norm: {:?})",
        config.optim.weight_decay, config.optim.norm_weight_decay
    );
    info!(
        "  Warmup: {} epochs from factor {}",
        config.optim.warmup_epochs, config.optim.warmup_decay
    );
    info!("  Train dir: {}", config.data.train_dir.display());
    info!("  Val dir: {}", config.data.val_dir.display());
}

fn open_dataset(dir: &Path, expected_classes: usize) -> Result<Arc<dyn Dataset<ImageItem>>> {
    let dataset = ImageFolderDataset::new(dir)
        .with_context(|| format!("Failed to open image folder {}", dir.display()))?;
    if dataset.num_classes() != expected_classes {
        anyhow::bail!(
            "{} has {} classes but model.num_classes is {}",
            dir.display(),
            dataset.num_classes(),
            expected_classes
        );
    }
    info!("Loaded {} samples from {}", dataset.len(), dir.display());
    Ok(Arc::new(dataset))
}

fn build_loaders(config: &ClassifierConfig) -> Result<(BatchLoader<ImageItem>, BatchLoader<ImageItem>)> {
    let data = &config.data;
    let train = open_dataset(&data.train_dir, config.model.num_classes)?;
    let val = open_dataset(&data.val_dir, config.model.num_classes)?;

    let train_loader = BatchLoader::new(train, data.batch_size)
        .shuffle(config.seed)
        .num_workers(data.num_workers);
    let val_loader = BatchLoader::new(val, data.batch_size).num_workers(data.num_workers);
    Ok((train_loader, val_loader))
}
