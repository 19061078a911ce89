//! The variable-input array model.

use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use ctalearn_core::{CtaLearnError, ModelParams, Result, TelescopeCombination};

use crate::candle_err;
use crate::component::{ArrayHead, FeatureLayout, HeadSpec, TelescopeExtractor};
use crate::fusion;
use crate::inputs::{FeatureBundle, IngestedBatch, LabelBundle};
use crate::loss::softmax_cross_entropy;
use crate::masking::mask_untriggered;
use crate::registry::{ComponentRegistry, ExtractorEntry, HeadEntry};

/// Result of a forward pass with labels.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Scalar mean cross-entropy.
    pub loss: Tensor,
    /// `[batch, num_gamma_hadron_classes]`.
    pub logits: Tensor,
}

/// Shared-weight extractor, trigger masking, fusion, and head, wired from a
/// [`ModelParams`] configuration.
///
/// The extractor's parameters live under `cnn_block.*` and the head's under
/// `network_head.*` of the [`VarBuilder`] passed to [`VariableInputModel::new`].
pub struct VariableInputModel {
    params: ModelParams,
    combination: TelescopeCombination,
    extractor: Box<dyn TelescopeExtractor>,
    head: Box<dyn ArrayHead>,
    fused_shape: Vec<usize>,
    device: Device,
}

impl VariableInputModel {
    /// Resolve components by name and build them.
    ///
    /// Names and layout compatibility are checked before any factory runs.
    ///
    /// # Errors
    ///
    /// Returns [`CtaLearnError::Config`] for invalid numeric options, an
    /// unknown `cnn_block` / `telescope_combination` / `network_head`, or a
    /// fusion strategy whose layout disagrees with the extractor or head.
    pub fn new(params: ModelParams, registry: &ComponentRegistry, vb: VarBuilder) -> Result<Self> {
        let (combination, extractor_entry, head_entry) = resolve(&params, registry)
            .inspect_err(|e| tracing::warn!(error = %e, "Rejected model configuration"))?;

        let extractor = (extractor_entry.factory)(params.image_shape, vb.pp("cnn_block"))?;
        let telescope_shape = extractor.output_shape().to_vec();
        if FeatureLayout::of_shape(&telescope_shape) != Some(extractor_entry.layout) {
            return Err(CtaLearnError::Config(format!(
                "cnn_block '{}' declares {} output but produces shape {telescope_shape:?}",
                params.cnn_block, extractor_entry.layout
            )));
        }

        let fused_shape = fusion::fused_shape(
            combination,
            &telescope_shape,
            params.num_telescopes,
            params.num_auxiliary_inputs,
        )?;

        let head_spec = HeadSpec {
            input_shape: fused_shape.clone(),
            num_classes: params.num_gamma_hadron_classes,
            dropout_rate: params.dropout_rate,
        };
        let head = (head_entry.factory)(&head_spec, vb.pp("network_head"))?;

        tracing::info!(
            cnn_block = extractor.name(),
            telescope_combination = %combination,
            network_head = head.name(),
            num_telescopes = params.num_telescopes,
            image_shape = %params.image_shape,
            telescope_features = ?telescope_shape,
            fused_shape = ?fused_shape,
            "Built variable-input model"
        );

        Ok(Self {
            params,
            combination,
            extractor,
            head,
            fused_shape,
            device: vb.device().clone(),
        })
    }

    /// Class logits `[batch, num_gamma_hadron_classes]`.
    pub fn forward(&self, features: &FeatureBundle, train: bool) -> Result<Tensor> {
        let batch = IngestedBatch::new(features, None, &self.params, &self.device)?;
        let fused = self.fuse(&batch, train)?;
        self.head.forward(&fused, train)
    }

    /// Logits plus the categorical cross-entropy against `labels`.
    pub fn forward_with_loss(
        &self,
        features: &FeatureBundle,
        labels: &LabelBundle,
        train: bool,
    ) -> Result<ModelOutput> {
        let batch = IngestedBatch::new(features, Some(labels), &self.params, &self.device)?;
        let fused = self.fuse(&batch, train)?;
        let logits = self.head.forward(&fused, train)?;
        let labels = batch.labels.as_ref().ok_or_else(|| {
            CtaLearnError::InvalidInput("labels missing after ingestion".to_string())
        })?;
        let loss = softmax_cross_entropy(&logits, labels)?;
        Ok(ModelOutput { loss, logits })
    }

    /// The fused array tensor the head would receive.
    pub fn array_features(&self, features: &FeatureBundle, train: bool) -> Result<Tensor> {
        let batch = IngestedBatch::new(features, None, &self.params, &self.device)?;
        self.fuse(&batch, train)
    }

    /// Static non-batch shape of the fused array tensor.
    pub fn fused_shape(&self) -> &[usize] {
        &self.fused_shape
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn combination(&self) -> TelescopeCombination {
        self.combination
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Dispatch every telescope through the shared extractor, mask, and fuse.
    fn fuse(&self, batch: &IngestedBatch, train: bool) -> Result<Tensor> {
        // [b, N, W, H, C] -> [N, b, W, H, C]
        let by_telescope = batch
            .images
            .transpose(0, 1)
            .and_then(|t| t.contiguous())
            .map_err(candle_err("move telescope axis to front"))?;

        let mut outputs = Vec::with_capacity(self.params.num_telescopes);
        for t in 0..self.params.num_telescopes {
            let images = by_telescope.get(t).map_err(candle_err("select telescope images"))?;
            let triggers = batch
                .triggers
                .i((.., t))
                .map_err(candle_err("select telescope triggers"))?;

            let features = self.extractor.forward(&images, &triggers, train)?;
            if features.dims().get(1..) != Some(self.extractor.output_shape()) {
                return Err(CtaLearnError::ShapeMismatch(format!(
                    "{} produced {:?} for telescope {t}, declared [batch, {:?}]",
                    self.extractor.name(),
                    features.dims(),
                    self.extractor.output_shape()
                )));
            }
            let features = mask_untriggered(&features, &triggers)?;
            tracing::trace!(
                telescope = t,
                shape = ?features.dims(),
                "Extracted telescope features"
            );
            outputs.push(features);
        }

        fusion::combine(self.combination, &outputs, &batch.positions, &batch.triggers)
    }
}

/// Name lookups and layout checks; runs before any parameter is created.
fn resolve<'r>(
    params: &ModelParams,
    registry: &'r ComponentRegistry,
) -> Result<(TelescopeCombination, &'r ExtractorEntry, &'r HeadEntry)> {
    params.validate()?;
    let combination = params.combination()?;
    let extractor = registry.extractor(&params.cnn_block)?;
    let head = registry.head(&params.network_head)?;

    if combination == TelescopeCombination::FeatureMap
        && extractor.layout != FeatureLayout::FeatureMap
    {
        return Err(CtaLearnError::Config(format!(
            "featuremap fusion needs a feature-map extractor, cnn_block '{}' produces a {}",
            params.cnn_block, extractor.layout
        )));
    }
    let fused_layout = fusion::output_layout(combination);
    if fused_layout != head.layout {
        return Err(CtaLearnError::Config(format!(
            "{combination} fusion produces a {fused_layout} but network_head '{}' expects a {}",
            params.network_head, head.layout
        )));
    }
    Ok((combination, extractor, head))
}
