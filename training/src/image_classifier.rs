//! Single-telescope binary classifier used by the hyperparameter search.
//!
//! ```text
//! image [B, W, H, C] → cnn_block → flatten → Linear(1) → logit [B]
//! ```

use candle_core::{DType, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use ctalearn_core::{CtaLearnError, ImageShape, Result};
use ctalearn_models::{ComponentRegistry, TelescopeExtractor};

fn model_err(context: &'static str) -> impl Fn(candle_core::Error) -> CtaLearnError {
    move |e| CtaLearnError::Model(format!("{context}: {e}"))
}

pub struct ImageClassifier {
    extractor: Box<dyn TelescopeExtractor>,
    output: Linear,
}

impl ImageClassifier {
    /// Build a registered extractor under `cnn_block.*` and a one-unit
    /// output layer under `output.*`.
    pub fn new(
        cnn_block: &str,
        image_shape: ImageShape,
        registry: &ComponentRegistry,
        vb: VarBuilder,
    ) -> Result<Self> {
        let entry = registry.extractor(cnn_block)?;
        let extractor = (entry.factory)(image_shape, vb.pp("cnn_block"))?;
        let width: usize = extractor.output_shape().iter().product();
        let output = candle_nn::linear(width, 1, vb.pp("output"))
            .map_err(model_err("create output layer"))?;
        tracing::info!(
            cnn_block = extractor.name(),
            %image_shape,
            features = width,
            "Built image classifier"
        );
        Ok(Self { extractor, output })
    }

    /// One logit per image; positive means class 1.
    pub fn forward(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        let batch = images.dim(0).map_err(model_err("image batch dim"))?;
        let triggers = Tensor::ones(batch, DType::F32, images.device())
            .map_err(model_err("image triggers"))?;
        let features = self.extractor.forward(images, &triggers, train)?;
        features
            .flatten_from(1)
            .and_then(|t| self.output.forward(&t))
            .and_then(|t| t.squeeze(1))
            .map_err(model_err("image classifier output"))
    }
}

/// Binary cross-entropy between logits `[B]` and 0/1 labels `[B]`.
pub fn binary_loss(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let targets = labels.to_dtype(DType::F32).map_err(model_err("cast targets"))?;
    candle_nn::loss::binary_cross_entropy_with_logit(logits, &targets)
        .map_err(model_err("binary cross entropy"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_logit_per_image() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = ImageClassifier::new(
            "alexnet",
            ImageShape::new(8, 8, 1),
            &ComponentRegistry::with_defaults(),
            vb,
        )
        .unwrap();
        let images = Tensor::ones((5, 8, 8, 1), DType::F32, &device).unwrap();
        let logits = model.forward(&images, false).unwrap();
        assert_eq!(logits.dims(), &[5]);

        let labels = Tensor::new(&[0u32, 1, 0, 1, 1], &device).unwrap();
        let loss: f32 = binary_loss(&logits, &labels).unwrap().to_scalar().unwrap();
        assert!(loss.is_finite() && loss > 0.0);
    }

    #[test]
    fn test_unknown_block() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let registry = ComponentRegistry::default();
        assert!(matches!(
            ImageClassifier::new("vgg", ImageShape::new(8, 8, 1), &registry, vb),
            Err(CtaLearnError::Config(_))
        ));
    }

    #[test]
    fn test_zero_logits_give_ln2() {
        let device = Device::Cpu;
        let logits = Tensor::zeros(4, DType::F32, &device).unwrap();
        let labels = Tensor::new(&[0u32, 1, 1, 0], &device).unwrap();
        let loss: f32 = binary_loss(&logits, &labels).unwrap().to_scalar().unwrap();
        assert!((loss - 2f32.ln()).abs() < 1e-5);
    }
}
