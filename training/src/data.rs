//! Dataset loading and batch iteration.
//!
//! Datasets are directories holding a `manifest.json` and one safetensors file:
//!
//! ```text
//! array dataset:  manifest.json + events.safetensors
//!                 telescope_data [E, N, W, H, C], telescope_triggers [E, N],
//!                 telescope_positions [N, A], gamma_hadron_labels [E]
//! image dataset:  manifest.json + images.safetensors
//!                 images [E, W, H, C], labels [E]
//! ```

use candle_core::{DType, Device, Tensor};
use ctalearn_core::{CtaLearnError, ImageShape, ModelParams, Result};
use ctalearn_models::{class_indices, FeatureBundle, IngestedBatch, LabelBundle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const EVENTS_FILE: &str = "events.safetensors";
pub const IMAGES_FILE: &str = "images.safetensors";

fn model_err(context: &str) -> impl Fn(candle_core::Error) -> CtaLearnError + '_ {
    move |e| CtaLearnError::Model(format!("{context}: {e}"))
}

fn read_manifest<T: for<'de> Deserialize<'de>>(dir: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_manifest<T: Serialize>(dir: &Path, manifest: &T) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(manifest)?)?;
    Ok(())
}

fn take(tensors: &mut HashMap<String, Tensor>, name: &str, path: &Path) -> Result<Tensor> {
    tensors.remove(name).ok_or_else(|| {
        CtaLearnError::Config(format!("tensor '{name}' not found in {}", path.display()))
    })
}

/// Labels copied to the host.
// ---------------------------------------------------------------------------
// Array events
// ---------------------------------------------------------------------------

/// Description stored next to an array event file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayManifest {
    pub num_events: usize,
    pub image_shape: ImageShape,
    pub num_telescopes: usize,
    pub num_auxiliary_inputs: usize,
    /// Events per class, indexed by class.
    pub class_counts: Vec<usize>,
}

/// Array events held in memory, already in the model's static shapes.
#[derive(Debug, Clone)]
pub struct ArrayDataset {
    pub manifest: ArrayManifest,
    /// `[E, N, W, H, C]`
    pub images: Tensor,
    /// `[E, N]`
    pub triggers: Tensor,
    /// `[N, A]`
    pub positions: Tensor,
    /// `[E]`, u32
    pub labels: Tensor,
}

impl ArrayDataset {
    /// Load and validate an array dataset directory against `params`.
    ///
    /// # Errors
    ///
    /// [`CtaLearnError::Config`] when the manifest disagrees with `params` or
    /// a tensor is missing; shape and label errors come from ingestion.
    pub fn load(dir: &Path, params: &ModelParams, device: &Device) -> Result<Self> {
        let manifest: ArrayManifest = read_manifest(dir)?;
        if manifest.image_shape != params.image_shape
            || manifest.num_telescopes != params.num_telescopes
            || manifest.num_auxiliary_inputs != params.num_auxiliary_inputs
            || manifest.class_counts.len() != params.num_gamma_hadron_classes
        {
            return Err(CtaLearnError::Config(format!(
                "dataset {} ({} telescopes of {}, {} aux inputs, {} classes) does not match \
                 the model ({} telescopes of {}, {} aux inputs, {} classes)",
                dir.display(),
                manifest.num_telescopes,
                manifest.image_shape,
                manifest.num_auxiliary_inputs,
                manifest.class_counts.len(),
                params.num_telescopes,
                params.image_shape,
                params.num_auxiliary_inputs,
                params.num_gamma_hadron_classes,
            )));
        }

        let path = dir.join(EVENTS_FILE);
        let mut tensors = candle_core::safetensors::load(&path, device)
            .map_err(model_err("load events"))?;
        let features = FeatureBundle {
            telescope_data: take(&mut tensors, "telescope_data", &path)?,
            telescope_triggers: take(&mut tensors, "telescope_triggers", &path)?,
            telescope_positions: take(&mut tensors, "telescope_positions", &path)?,
        };
        let labels = LabelBundle {
            gamma_hadron_labels: take(&mut tensors, "gamma_hadron_labels", &path)?,
        };

        let batch = IngestedBatch::new(&features, Some(&labels), params, device)?;
        if batch.batch_size != manifest.num_events {
            return Err(CtaLearnError::ShapeMismatch(format!(
                "{} holds {} events, manifest says {}",
                path.display(),
                batch.batch_size,
                manifest.num_events
            )));
        }
        let labels = batch.labels.ok_or_else(|| {
            CtaLearnError::InvalidInput(format!("{} has no labels", path.display()))
        })?;

        tracing::info!(
            path = %dir.display(),
            events = manifest.num_events,
            class_counts = ?manifest.class_counts,
            "Loaded array dataset"
        );

        Ok(Self {
            manifest,
            images: batch.images,
            triggers: batch.triggers,
            positions: batch.positions,
            labels,
        })
    }

    /// Write the manifest and event tensors to `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        write_manifest(dir, &self.manifest)?;
        let tensors = HashMap::from([
            ("telescope_data", self.images.clone()),
            ("telescope_triggers", self.triggers.clone()),
            ("telescope_positions", self.positions.clone()),
            ("gamma_hadron_labels", self.labels.clone()),
        ]);
        candle_core::safetensors::save(&tensors, dir.join(EVENTS_FILE))
            .map_err(model_err("save events"))
    }

    /// Build a dataset from in-memory tensors; the manifest is derived.
    pub fn from_tensors(
        images: Tensor,
        triggers: Tensor,
        positions: Tensor,
        labels: Tensor,
        num_classes: usize,
    ) -> Result<Self> {
        let (num_events, num_telescopes, w, h, c) =
            images.dims5().map_err(model_err("array images"))?;
        let (_, num_auxiliary_inputs) = positions.dims2().map_err(model_err("positions"))?;
        let mut class_counts = vec![0usize; num_classes];
        for label in class_indices(&labels, num_classes)? {
            class_counts[label as usize] += 1;
        }
        let labels = labels.to_dtype(DType::U32).map_err(model_err("labels"))?;
        Ok(Self {
            manifest: ArrayManifest {
                num_events,
                image_shape: ImageShape::new(w, h, c),
                num_telescopes,
                num_auxiliary_inputs,
                class_counts,
            },
            images,
            triggers,
            positions,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.manifest.num_events
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.num_events == 0
    }

    /// Select the rows in `indices` as model inputs; positions are shared.
    pub fn batch(&self, indices: &Tensor) -> Result<(FeatureBundle, LabelBundle)> {
        let features = FeatureBundle {
            telescope_data: self
                .images
                .index_select(indices, 0)
                .map_err(model_err("select images"))?,
            telescope_triggers: self
                .triggers
                .index_select(indices, 0)
                .map_err(model_err("select triggers"))?,
            telescope_positions: self.positions.clone(),
        };
        let labels = LabelBundle {
            gamma_hadron_labels: self
                .labels
                .index_select(indices, 0)
                .map_err(model_err("select labels"))?,
        };
        Ok((features, labels))
    }
}

// ---------------------------------------------------------------------------
// Single-telescope images
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub num_images: usize,
    pub image_shape: ImageShape,
    pub class_names: Vec<String>,
}

/// Labelled single-telescope images.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    pub manifest: ImageManifest,
    /// `[E, W, H, C]`, f32
    pub images: Tensor,
    /// `[E]`, u32
    pub labels: Tensor,
}

impl ImageDataset {
    pub fn load(dir: &Path, device: &Device) -> Result<Self> {
        let manifest: ImageManifest = read_manifest(dir)?;
        let path = dir.join(IMAGES_FILE);
        let mut tensors = candle_core::safetensors::load(&path, device)
            .map_err(model_err("load images"))?;

        let [w, h, c] = manifest.image_shape.dims();
        let images = take(&mut tensors, "images", &path)?;
        let labels = take(&mut tensors, "labels", &path)?;
        let expected = [manifest.num_images, w, h, c];
        if images.dims() != expected || labels.dims() != [manifest.num_images] {
            return Err(CtaLearnError::ShapeMismatch(format!(
                "{}: images {:?} / labels {:?} do not match {} images of {}",
                path.display(),
                images.dims(),
                labels.dims(),
                manifest.num_images,
                manifest.image_shape
            )));
        }
        class_indices(&labels, manifest.class_names.len())
            .map_err(|e| CtaLearnError::InvalidInput(format!("{}: {e}", path.display())))?;
        let images = images.to_dtype(DType::F32).map_err(model_err("cast images"))?;
        let labels = labels.to_dtype(DType::U32).map_err(model_err("cast labels"))?;

        tracing::info!(
            path = %dir.display(),
            images = manifest.num_images,
            classes = ?manifest.class_names,
            "Loaded image dataset"
        );
        Ok(Self {
            manifest,
            images,
            labels,
        })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        write_manifest(dir, &self.manifest)?;
        let tensors = HashMap::from([
            ("images", self.images.clone()),
            ("labels", self.labels.clone()),
        ]);
        candle_core::safetensors::save(&tensors, dir.join(IMAGES_FILE))
            .map_err(model_err("save images"))
    }

    pub fn len(&self) -> usize {
        self.manifest.num_images
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.num_images == 0
    }

    pub fn batch(&self, indices: &Tensor) -> Result<(Tensor, Tensor)> {
        let images = self.images.index_select(indices, 0).map_err(model_err("select images"))?;
        let labels = self.labels.index_select(indices, 0).map_err(model_err("select labels"))?;
        Ok((images, labels))
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// Mini-batch row indices over a dataset of `len` rows. Reshuffles each epoch.
pub struct BatchIterator {
    indices: Vec<u32>,
    batch_size: usize,
    pos: usize,
    device: Device,
}

impl BatchIterator {
    pub fn new(len: usize, batch_size: usize, device: &Device) -> Self {
        Self {
            indices: (0..len as u32).collect(),
            batch_size: batch_size.max(1),
            pos: 0,
            device: device.clone(),
        }
    }

    /// Reshuffle for a new epoch using a seeded RNG derived from base seed + epoch.
    pub fn reshuffle(&mut self, seed: u64, epoch: usize) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
        self.indices.shuffle(&mut rng);
        self.pos = 0;
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Returns the next batch of row indices, or None if the epoch is exhausted.
    pub fn next_batch(&mut self) -> Option<Tensor> {
        let n = self.indices.len();
        if self.pos >= n {
            return None;
        }
        let end = (self.pos + self.batch_size).min(n);
        let batch = &self.indices[self.pos..end];
        self.pos = end;
        Tensor::new(batch, &self.device).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params() -> ModelParams {
        ModelParams {
            image_shape: ImageShape::new(4, 4, 1),
            num_telescopes: 2,
            num_auxiliary_inputs: 2,
            num_gamma_hadron_classes: 2,
            cnn_block: "sumpool".to_string(),
            telescope_combination: "vector".to_string(),
            network_head: "resnetfeaturevector".to_string(),
            dropout_rate: 0.5,
        }
    }

    fn events(device: &Device) -> ArrayDataset {
        let images = Tensor::arange(0f32, 5. * 32., device)
            .unwrap()
            .reshape((5, 2, 4, 4, 1))
            .unwrap();
        let triggers = Tensor::ones((5, 2), DType::F32, device).unwrap();
        let positions = Tensor::new(&[[0f32, 1.], [2., 3.]], device).unwrap();
        let labels = Tensor::new(&[0u32, 1, 1, 0, 1], device).unwrap();
        ArrayDataset::from_tensors(images, triggers, positions, labels, 2).unwrap()
    }

    #[test]
    fn test_batch_iterator_exhausts() {
        let mut iter = BatchIterator::new(10, 3, &Device::Cpu);
        iter.reshuffle(42, 0);
        assert_eq!(iter.num_batches(), 4);

        let mut seen = Vec::new();
        while let Some(batch) = iter.next_batch() {
            seen.extend(batch.to_vec1::<u32>().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn test_reshuffle_is_seeded_per_epoch() {
        let order = |seed: u64, epoch: usize| {
            let mut iter = BatchIterator::new(16, 16, &Device::Cpu);
            iter.reshuffle(seed, epoch);
            iter.next_batch().unwrap().to_vec1::<u32>().unwrap()
        };
        assert_eq!(order(7, 1), order(7, 1));
        assert_ne!(order(7, 1), order(7, 2));
    }

    #[test]
    fn test_array_dataset_roundtrip() {
        let dir = TempDir::new().unwrap();
        let device = Device::Cpu;
        let dataset = events(&device);
        assert_eq!(dataset.manifest.class_counts, vec![2, 3]);
        dataset.save(dir.path()).unwrap();

        let loaded = ArrayDataset::load(dir.path(), &params(), &device).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.images.dims(), &[5, 2, 4, 4, 1]);
        assert_eq!(loaded.labels.to_vec1::<u32>().unwrap(), vec![0, 1, 1, 0, 1]);

        let idx = Tensor::new(&[4u32, 0], &device).unwrap();
        let (features, labels) = loaded.batch(&idx).unwrap();
        assert_eq!(features.telescope_data.dims(), &[2, 2, 4, 4, 1]);
        assert_eq!(features.telescope_positions.dims(), &[2, 2]);
        assert_eq!(labels.gamma_hadron_labels.to_vec1::<u32>().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_array_dataset_must_match_model() {
        let dir = TempDir::new().unwrap();
        let device = Device::Cpu;
        events(&device).save(dir.path()).unwrap();

        let wrong = ModelParams {
            num_telescopes: 3,
            ..params()
        };
        assert!(matches!(
            ArrayDataset::load(dir.path(), &wrong, &device),
            Err(CtaLearnError::Config(_))
        ));
    }

    #[test]
    fn test_missing_manifest_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ArrayDataset::load(dir.path(), &params(), &Device::Cpu),
            Err(CtaLearnError::Io(_))
        ));
    }

    #[test]
    fn test_image_dataset_roundtrip() {
        let dir = TempDir::new().unwrap();
        let device = Device::Cpu;
        let dataset = ImageDataset {
            manifest: ImageManifest {
                num_images: 3,
                image_shape: ImageShape::new(4, 4, 1),
                class_names: vec!["gamma".to_string(), "proton".to_string()],
            },
            images: Tensor::zeros((3, 4, 4, 1), DType::F32, &device).unwrap(),
            labels: Tensor::new(&[0u32, 1, 0], &device).unwrap(),
        };
        dataset.save(dir.path()).unwrap();

        let loaded = ImageDataset::load(dir.path(), &device).unwrap();
        assert_eq!(loaded.len(), 3);
        let (images, labels) = loaded.batch(&Tensor::new(&[1u32], &device).unwrap()).unwrap();
        assert_eq!(images.dims(), &[1, 4, 4, 1]);
        assert_eq!(labels.to_vec1::<u32>().unwrap(), vec![1]);
    }

    #[test]
    fn test_fractional_and_negative_labels_are_rejected() {
        let device = Device::Cpu;
        let dataset = |labels: &[f32]| {
            ArrayDataset::from_tensors(
                Tensor::zeros((2, 2, 4, 4, 1), DType::F32, &device).unwrap(),
                Tensor::ones((2, 2), DType::F32, &device).unwrap(),
                Tensor::zeros((2, 2), DType::F32, &device).unwrap(),
                Tensor::new(labels, &device).unwrap(),
                2,
            )
        };
        assert!(dataset(&[0.0, 1.0]).is_ok());
        for bad in [[0.0f32, 0.5], [-1.0, 1.0], [0.0, 2.0]] {
            assert!(matches!(
                dataset(&bad),
                Err(CtaLearnError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_image_dataset_rejects_fractional_label() {
        let dir = TempDir::new().unwrap();
        let device = Device::Cpu;
        let dataset = ImageDataset {
            manifest: ImageManifest {
                num_images: 2,
                image_shape: ImageShape::new(2, 2, 1),
                class_names: vec!["gamma".to_string(), "proton".to_string()],
            },
            images: Tensor::zeros((2, 2, 2, 1), DType::F32, &device).unwrap(),
            labels: Tensor::new(&[0.7f32, 1.0], &device).unwrap(),
        };
        dataset.save(dir.path()).unwrap();
        assert!(matches!(
            ImageDataset::load(dir.path(), &device),
            Err(CtaLearnError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_image_dataset_rejects_unknown_class() {
        let dir = TempDir::new().unwrap();
        let device = Device::Cpu;
        let dataset = ImageDataset {
            manifest: ImageManifest {
                num_images: 2,
                image_shape: ImageShape::new(2, 2, 1),
                class_names: vec!["gamma".to_string(), "proton".to_string()],
            },
            images: Tensor::zeros((2, 2, 2, 1), DType::F32, &device).unwrap(),
            labels: Tensor::new(&[0u32, 2], &device).unwrap(),
        };
        dataset.save(dir.path()).unwrap();
        assert!(matches!(
            ImageDataset::load(dir.path(), &device),
            Err(CtaLearnError::InvalidInput(_))
        ));
    }
}
