//! Training loop for the variable-input array model with early stopping.

use crate::checkpoint::{checkpoint_file_name, parameter_count, save_weights, RunDirs};
use crate::config::RunConfig;
use crate::data::{ArrayDataset, BatchIterator};
use crate::history::{EpochLogger, EpochRecord};
use crate::metrics::ClassificationMetrics;
use anyhow::Context;
use candle_core::{Device, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ctalearn_models::{ComponentRegistry, VariableInputModel};
use std::path::{Path, PathBuf};

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub history: Vec<EpochRecord>,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub best_weights: PathBuf,
    pub final_metrics: ClassificationMetrics,
}

/// Mean loss and metrics over a dataset.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub loss: f64,
    pub metrics: ClassificationMetrics,
}

/// Run the full pipeline: load data, build the model, train, keep the best weights.
///
/// Fails when no epoch improves on the initial validation loss, for example
/// when every validation loss is NaN, since no best weights exist then.
pub fn train_array_model(
    config: &RunConfig,
    train_dir: &Path,
    val_dir: &Path,
    run_dirs: &RunDirs,
    run_name: &str,
    device: &Device,
) -> anyhow::Result<TrainingSummary> {
    let params = &config.model;
    let train_cfg = &config.training;

    let train_set = ArrayDataset::load(train_dir, params, device)
        .with_context(|| format!("Failed to load training data from {}", train_dir.display()))?;
    let val_set = ArrayDataset::load(val_dir, params, device)
        .with_context(|| format!("Failed to load validation data from {}", val_dir.display()))?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, device);
    let model = VariableInputModel::new(params.clone(), &ComponentRegistry::with_defaults(), vb)?;
    tracing::info!(parameters = parameter_count(&varmap), "Model ready");

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: train_cfg.lr,
            beta1: train_cfg.beta_1,
            beta2: train_cfg.beta_2,
            eps: train_cfg.eps,
            weight_decay: train_cfg.weight_decay,
        },
    )
    .map_err(|e| anyhow::anyhow!("Failed to create optimizer: {e}"))?;

    let mut logger = EpochLogger::open(&run_dirs.root.join(format!("{run_name}.log")))?;
    let mut batches = BatchIterator::new(train_set.len(), train_cfg.batch_size, device);
    let best_weights = run_dirs.best_weights();

    let mut best_val_loss = f64::MAX;
    let mut best_epoch = 0usize;
    let mut patience_counter = 0usize;
    let mut history = Vec::new();
    let mut final_metrics = None;

    tracing::info!(
        lr = train_cfg.lr,
        batch_size = train_cfg.batch_size,
        max_epochs = train_cfg.max_epochs,
        patience = train_cfg.patience,
        train_events = train_set.len(),
        val_events = val_set.len(),
        "Training started"
    );

    for epoch in 1..=train_cfg.max_epochs {
        batches.reshuffle(train_cfg.seed, epoch);

        let mut loss_sum = 0.0;
        let mut predictions = Vec::with_capacity(train_set.len());
        let mut truth = Vec::with_capacity(train_set.len());
        let mut seen = 0usize;

        while let Some(indices) = batches.next_batch() {
            let (features, labels) = train_set.batch(&indices)?;
            let out = model.forward_with_loss(&features, &labels, true)?;
            optimizer
                .backward_step(&out.loss)
                .map_err(|e| anyhow::anyhow!("Backward step failed: {e}"))?;

            let rows = indices.elem_count();
            let loss: f32 = out
                .loss
                .to_scalar()
                .map_err(|e| anyhow::anyhow!("Loss scalar failed: {e}"))?;
            loss_sum += f64::from(loss) * rows as f64;
            seen += rows;
            predictions.extend(
                out.logits
                    .argmax(D::Minus1)
                    .and_then(|p| p.to_vec1::<u32>())
                    .map_err(|e| anyhow::anyhow!("argmax failed: {e}"))?,
            );
            truth.extend(
                labels
                    .gamma_hadron_labels
                    .to_vec1::<u32>()
                    .map_err(|e| anyhow::anyhow!("labels to vec: {e}"))?,
            );
        }

        let train_loss = if seen > 0 { loss_sum / seen as f64 } else { 0.0 };
        let train_metrics =
            ClassificationMetrics::compute(&predictions, &truth, params.num_gamma_hadron_classes);
        let val = evaluate(&model, &val_set, train_cfg.batch_size)?;

        let record = EpochRecord {
            epoch,
            loss: train_loss,
            acc: train_metrics.accuracy,
            val_loss: val.loss,
            val_acc: val.metrics.accuracy,
        };
        logger.log(&record)?;
        save_weights(
            &varmap,
            &run_dirs
                .checkpoints
                .join(checkpoint_file_name(run_name, epoch, val.loss)),
        )?;

        let improved = val.loss < best_val_loss;
        if improved {
            best_val_loss = val.loss;
            best_epoch = epoch;
            patience_counter = 0;
            save_weights(&varmap, &best_weights)?;
        } else {
            patience_counter += 1;
        }

        tracing::info!(
            epoch,
            loss = train_loss,
            acc = train_metrics.accuracy,
            val_loss = val.loss,
            val = %val.metrics,
            improved,
            "Epoch finished"
        );
        history.push(record);
        final_metrics = Some(val.metrics);

        if patience_counter > 0 && patience_counter >= train_cfg.patience {
            tracing::info!(epoch, patience = train_cfg.patience, "Early stopping");
            break;
        }
    }

    let Some(final_metrics) = final_metrics.filter(|_| best_epoch > 0) else {
        anyhow::bail!(
            "No epoch produced a finite validation loss after {} epoch(s); {} was not written",
            history.len(),
            best_weights.display()
        );
    };
    tracing::info!(
        best_epoch,
        best_val_loss,
        path = %best_weights.display(),
        "Training finished"
    );

    Ok(TrainingSummary {
        history,
        best_epoch,
        best_val_loss,
        best_weights,
        final_metrics,
    })
}

/// Evaluate `model` on `dataset` in order, `batch_size` events at a time.
pub fn evaluate(
    model: &VariableInputModel,
    dataset: &ArrayDataset,
    batch_size: usize,
) -> anyhow::Result<Evaluation> {
    let num_classes = model.params().num_gamma_hadron_classes;
    let mut batches = BatchIterator::new(dataset.len(), batch_size, model.device());
    let mut loss_sum = 0.0;
    let mut predictions = Vec::with_capacity(dataset.len());
    let mut truth = Vec::with_capacity(dataset.len());

    while let Some(indices) = batches.next_batch() {
        let (features, labels) = dataset.batch(&indices)?;
        let out = model.forward_with_loss(&features, &labels, false)?;
        let loss: f32 = out
            .loss
            .to_scalar()
            .map_err(|e| anyhow::anyhow!("Val loss scalar: {e}"))?;
        loss_sum += f64::from(loss) * indices.elem_count() as f64;
        predictions.extend(
            out.logits
                .argmax(D::Minus1)
                .and_then(|p| p.to_vec1::<u32>())
                .map_err(|e| anyhow::anyhow!("argmax failed: {e}"))?,
        );
        truth.extend(
            labels
                .gamma_hadron_labels
                .to_vec1::<u32>()
                .map_err(|e| anyhow::anyhow!("val labels to vec: {e}"))?,
        );
    }

    let loss = if truth.is_empty() {
        0.0
    } else {
        loss_sum / truth.len() as f64
    };
    Ok(Evaluation {
        loss,
        metrics: ClassificationMetrics::compute(&predictions, &truth, num_classes),
    })
}
