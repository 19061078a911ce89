//! Raw input bundles and their ingestion into the model's static shapes.

use candle_core::{DType, Device, Tensor};
use ctalearn_core::{CtaLearnError, ModelParams, Result};

use crate::candle_err;

/// Raw per-event features.
///
/// Tensors may hold any numeric dtype and any shape with the right element
/// count; ingestion reshapes and casts them.
#[derive(Debug, Clone)]
pub struct FeatureBundle {
    /// `batch * N * W * H * C` image values, telescope-major within an event.
    pub telescope_data: Tensor,
    /// `batch * N` trigger flags.
    pub telescope_triggers: Tensor,
    /// `N * aux` static telescope metadata.
    pub telescope_positions: Tensor,
}

impl FeatureBundle {
    /// Build a bundle from flat `f32` buffers.
    pub fn from_slices(
        telescope_data: &[f32],
        telescope_triggers: &[f32],
        telescope_positions: &[f32],
        device: &Device,
    ) -> Result<Self> {
        let flat = |values: &[f32]| {
            Tensor::from_slice(values, values.len(), device)
                .map_err(candle_err("flat input buffer"))
        };
        Ok(Self {
            telescope_data: flat(telescope_data)?,
            telescope_triggers: flat(telescope_triggers)?,
            telescope_positions: flat(telescope_positions)?,
        })
    }
}

/// Ground-truth class indices, one per event.
#[derive(Debug, Clone)]
pub struct LabelBundle {
    pub gamma_hadron_labels: Tensor,
}

impl LabelBundle {
    pub fn from_slice(labels: &[u32], device: &Device) -> Result<Self> {
        let gamma_hadron_labels = Tensor::from_slice(labels, labels.len(), device)
            .map_err(candle_err("label buffer"))?;
        Ok(Self {
            gamma_hadron_labels,
        })
    }
}

/// Inputs reshaped to the model's static shapes, on the model's device.
#[derive(Debug, Clone)]
pub struct IngestedBatch {
    /// `[batch, N, W, H, C]`, f32.
    pub images: Tensor,
    /// `[batch, N]`, f32.
    pub triggers: Tensor,
    /// `[N, aux]`, f32.
    pub positions: Tensor,
    /// `[batch]`, u32; present when labels were supplied.
    pub labels: Option<Tensor>,
    pub batch_size: usize,
}

impl IngestedBatch {
    /// Validate, reshape, and cast a feature bundle (and optional labels).
    ///
    /// # Errors
    ///
    /// - [`CtaLearnError::ShapeMismatch`] when any element count disagrees
    ///   with the configured telescope count, image shape, or aux width.
    /// - [`CtaLearnError::InvalidInput`] when a label is not a class index
    ///   in `0..num_gamma_hadron_classes`.
    pub fn new(
        features: &FeatureBundle,
        labels: Option<&LabelBundle>,
        params: &ModelParams,
        device: &Device,
    ) -> Result<Self> {
        let n = params.num_telescopes;
        let [w, h, c] = params.image_shape.dims();
        let aux = params.num_auxiliary_inputs;
        let per_event = n * params.image_shape.elem_count();

        let data_len = features.telescope_data.elem_count();
        if data_len == 0 || data_len % per_event != 0 {
            return Err(CtaLearnError::ShapeMismatch(format!(
                "telescope_data has {data_len} values, expected a positive multiple of \
                 {n} telescopes x {}",
                params.image_shape
            )));
        }
        let batch = data_len / per_event;

        let images = ingest_f32(
            &features.telescope_data,
            &[batch, n, w, h, c],
            "telescope_data",
            device,
        )?;
        let triggers = ingest_f32(
            &features.telescope_triggers,
            &[batch, n],
            "telescope_triggers",
            device,
        )?;
        let positions = ingest_f32(
            &features.telescope_positions,
            &[n, aux],
            "telescope_positions",
            device,
        )?;

        let num_classes = params.num_gamma_hadron_classes;
        let labels = labels
            .map(|l| ingest_labels(&l.gamma_hadron_labels, batch, num_classes, device))
            .transpose()?;

        Ok(Self {
            images,
            triggers,
            positions,
            labels,
            batch_size: batch,
        })
    }
}

fn check_count(tensor: &Tensor, dims: &[usize], name: &str) -> Result<()> {
    let expected: usize = dims.iter().product();
    if tensor.elem_count() != expected {
        return Err(CtaLearnError::ShapeMismatch(format!(
            "{name} has {} values, expected {expected} for shape {dims:?}",
            tensor.elem_count()
        )));
    }
    Ok(())
}

fn ingest_f32(tensor: &Tensor, dims: &[usize], name: &str, device: &Device) -> Result<Tensor> {
    check_count(tensor, dims, name)?;
    tensor
        .to_device(device)
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.reshape(dims))
        .map_err(candle_err("ingest input tensor"))
}

fn ingest_labels(
    labels: &Tensor,
    batch: usize,
    num_classes: usize,
    device: &Device,
) -> Result<Tensor> {
    check_count(labels, &[batch], "gamma_hadron_labels")?;
    let indices = class_indices(labels, num_classes)?;
    Tensor::from_vec(indices, batch, device).map_err(candle_err("label tensor"))
}

/// Read `labels` (any numeric dtype) as class indices in `0..num_classes`.
///
/// # Errors
///
/// Returns [`CtaLearnError::InvalidInput`] for negative, fractional or
/// out-of-range values. No value is truncated into a valid class.
pub fn class_indices(labels: &Tensor, num_classes: usize) -> Result<Vec<u32>> {
    let values = labels
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F64))
        .and_then(|t| t.to_vec1::<f64>())
        .map_err(candle_err("read labels"))?;

    let mut indices = Vec::with_capacity(values.len());
    for (i, v) in values.into_iter().enumerate() {
        if v < 0.0 || v.fract() != 0.0 || v >= num_classes as f64 {
            return Err(CtaLearnError::InvalidInput(format!(
                "label {v} at event {i} is not a class index in 0..{num_classes}"
            )));
        }
        indices.push(v as u32);
    }
    Ok(indices)
}
