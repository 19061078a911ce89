//! Random hyperparameter search for the single-image classifier.
//!
//! Each trial draws a learning rate and the two Adam moment decays, trains a
//! fresh [`ImageClassifier`] for a fixed number of epochs, and reports the
//! final validation accuracy. Results are ranked best first.

use crate::checkpoint::{checkpoint_file_name, load_weights, save_weights, RunDirs};
use crate::data::{BatchIterator, ImageDataset};
use crate::history::{EpochLogger, EpochRecord};
use crate::image_classifier::{binary_loss, ImageClassifier};
use crate::metrics::binary_accuracy;
use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ctalearn_models::ComponentRegistry;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt::Write as _;
use std::ops::Range;
use std::path::PathBuf;

pub const LR_RANGE: Range<f64> = 0.00009..0.0004;
pub const BETA_1_RANGE: Range<f64> = 0.88..0.95;
pub const BETA_2_RANGE: Range<f64> = 0.92..1.0;
const ADAM_EPS: f64 = 1e-8;

/// Search driver settings.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub train_dir: PathBuf,
    pub val_dir: PathBuf,
    pub run_name: String,
    pub save_dir: PathBuf,
    pub epochs: usize,
    /// Weights loaded into every trial's model before training.
    pub weights: Option<PathBuf>,
    pub batch_size: usize,
    pub samples: usize,
    pub seed: u64,
    pub cnn_block: String,
}

/// One sampled optimiser setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trial {
    pub lr: f64,
    pub beta_1: f64,
    pub beta_2: f64,
}

impl Trial {
    /// `{run_name}_{lr:.7}_{beta_1:.6}_{beta_2:.6}.log`
    pub fn log_file_name(&self, run_name: &str) -> String {
        format!(
            "{run_name}_{:.7}_{:.6}_{:.6}.log",
            self.lr, self.beta_1, self.beta_2
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialResult {
    pub trial: Trial,
    /// Validation accuracy after the last epoch.
    pub accuracy: f64,
}

/// Draw `samples` trials from the search ranges.
pub fn sample_trials(samples: usize, seed: u64) -> Vec<Trial> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..samples)
        .map(|_| Trial {
            lr: rng.gen_range(LR_RANGE),
            beta_1: rng.gen_range(BETA_1_RANGE),
            beta_2: rng.gen_range(BETA_2_RANGE),
        })
        .collect()
}

/// Sort by descending accuracy.
pub fn rank(mut results: Vec<TrialResult>) -> Vec<TrialResult> {
    results.sort_by(|a, b| b.accuracy.total_cmp(&a.accuracy));
    results
}

/// Ranked results as a printable table.
pub fn format_table(results: &[TrialResult]) -> String {
    let mut out = format!(
        "{:>4}  {:>10}  {:>8}  {:>8}  {:>8}\n",
        "rank", "lr", "beta_1", "beta_2", "val_acc"
    );
    for (i, r) in results.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>4}  {:>10.7}  {:>8.6}  {:>8.6}  {:>8.4}",
            i + 1,
            r.trial.lr,
            r.trial.beta_1,
            r.trial.beta_2,
            r.accuracy
        );
    }
    out
}

/// Run every sampled trial and return the results ranked best first.
pub fn run_search(config: &SearchConfig, device: &Device) -> anyhow::Result<Vec<TrialResult>> {
    if config.batch_size == 0 {
        bail!("batch size must be at least 1");
    }
    let run_dirs = RunDirs::create(&config.save_dir, &config.run_name)?;
    let train_set = ImageDataset::load(&config.train_dir, device).with_context(|| {
        format!(
            "Failed to load training images from {}",
            config.train_dir.display()
        )
    })?;
    let val_set = ImageDataset::load(&config.val_dir, device).with_context(|| {
        format!(
            "Failed to load validation images from {}",
            config.val_dir.display()
        )
    })?;
    for set in [&train_set, &val_set] {
        if set.manifest.class_names.len() != 2 {
            bail!(
                "binary search needs exactly two classes, got {:?}",
                set.manifest.class_names
            );
        }
    }
    if train_set.manifest.image_shape != val_set.manifest.image_shape {
        bail!(
            "training images are {}, validation images are {}",
            train_set.manifest.image_shape,
            val_set.manifest.image_shape
        );
    }

    let registry = ComponentRegistry::with_defaults();
    let trials = sample_trials(config.samples, config.seed);
    let mut results = Vec::with_capacity(trials.len());
    for (i, trial) in trials.into_iter().enumerate() {
        tracing::info!(
            trial = i + 1,
            of = config.samples,
            lr = trial.lr,
            beta_1 = trial.beta_1,
            beta_2 = trial.beta_2,
            "Starting trial"
        );
        let accuracy = run_trial(
            config, &trial, &run_dirs, &train_set, &val_set, &registry, device,
        )?;
        tracing::info!(trial = i + 1, accuracy, "Trial finished");
        results.push(TrialResult { trial, accuracy });
    }
    Ok(rank(results))
}

fn run_trial(
    config: &SearchConfig,
    trial: &Trial,
    run_dirs: &RunDirs,
    train_set: &ImageDataset,
    val_set: &ImageDataset,
    registry: &ComponentRegistry,
    device: &Device,
) -> anyhow::Result<f64> {
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let image_shape = train_set.manifest.image_shape;
    let model = ImageClassifier::new(&config.cnn_block, image_shape, registry, vb)?;
    if let Some(weights) = &config.weights {
        load_weights(&mut varmap, weights)?;
    }

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: trial.lr,
            beta1: trial.beta_1,
            beta2: trial.beta_2,
            eps: ADAM_EPS,
            weight_decay: 0.0,
        },
    )
    .map_err(|e| anyhow::anyhow!("Failed to create optimizer: {e}"))?;

    let mut logger = EpochLogger::open(&run_dirs.root.join(trial.log_file_name(&config.run_name)))?;
    let mut batches = BatchIterator::new(train_set.len(), config.batch_size, device);
    let mut accuracy = 0.0;

    for epoch in 1..=config.epochs {
        batches.reshuffle(config.seed, epoch);
        let mut loss_sum = 0.0;
        let mut logits_seen = Vec::with_capacity(train_set.len());
        let mut labels_seen = Vec::with_capacity(train_set.len());

        while let Some(indices) = batches.next_batch() {
            let (images, labels) = train_set.batch(&indices)?;
            let logits = model.forward(&images, true)?;
            let loss = binary_loss(&logits, &labels)?;
            optimizer
                .backward_step(&loss)
                .map_err(|e| anyhow::anyhow!("Backward step failed: {e}"))?;
            loss_sum += scalar(&loss)? * indices.elem_count() as f64;
            logits_seen.extend(host_vec::<f32>(&logits)?);
            labels_seen.extend(host_vec::<u32>(&labels)?);
        }

        let (val_loss, val_acc) = evaluate_binary(&model, val_set, config.batch_size, device)?;
        let record = EpochRecord {
            epoch,
            loss: if labels_seen.is_empty() {
                0.0
            } else {
                loss_sum / labels_seen.len() as f64
            },
            acc: binary_accuracy(&logits_seen, &labels_seen),
            val_loss,
            val_acc,
        };
        logger.log(&record)?;
        save_weights(
            &varmap,
            &run_dirs
                .checkpoints
                .join(checkpoint_file_name(&config.run_name, epoch, val_loss)),
        )?;
        tracing::debug!(epoch, loss = record.loss, val_loss, val_acc, "Epoch finished");
        accuracy = val_acc;
    }
    Ok(accuracy)
}

fn evaluate_binary(
    model: &ImageClassifier,
    dataset: &ImageDataset,
    batch_size: usize,
    device: &Device,
) -> anyhow::Result<(f64, f64)> {
    let mut batches = BatchIterator::new(dataset.len(), batch_size, device);
    let mut loss_sum = 0.0;
    let mut logits_seen = Vec::with_capacity(dataset.len());
    let mut labels_seen = Vec::with_capacity(dataset.len());
    while let Some(indices) = batches.next_batch() {
        let (images, labels) = dataset.batch(&indices)?;
        let logits = model.forward(&images, false)?;
        loss_sum += scalar(&binary_loss(&logits, &labels)?)? * indices.elem_count() as f64;
        logits_seen.extend(host_vec::<f32>(&logits)?);
        labels_seen.extend(host_vec::<u32>(&labels)?);
    }
    if labels_seen.is_empty() {
        return Ok((0.0, 0.0));
    }
    Ok((
        loss_sum / labels_seen.len() as f64,
        binary_accuracy(&logits_seen, &labels_seen),
    ))
}

fn scalar(t: &Tensor) -> anyhow::Result<f64> {
    let v: f32 = t
        .to_scalar()
        .map_err(|e| anyhow::anyhow!("Loss scalar failed: {e}"))?;
    Ok(f64::from(v))
}

fn host_vec<T: candle_core::WithDType>(t: &Tensor) -> anyhow::Result<Vec<T>> {
    t.to_vec1::<T>()
        .map_err(|e| anyhow::anyhow!("Tensor to host failed: {e}"))
}
