//! Name-keyed registry of extractor and head factories.
//!
//! Each entry declares the [`FeatureLayout`] of the component it builds, which
//! lets the model constructor reject incompatible combinations before any
//! factory runs.

use std::collections::HashMap;

use candle_nn::VarBuilder;
use ctalearn_core::{CtaLearnError, ImageShape, Result};

use crate::blocks;
use crate::component::{ArrayHead, FeatureLayout, HeadSpec, TelescopeExtractor};

/// Builds an extractor for the given image shape under a parameter prefix.
pub type ExtractorFactory =
    Box<dyn Fn(ImageShape, VarBuilder) -> Result<Box<dyn TelescopeExtractor>> + Send + Sync>;

/// Builds a head for the given fused input under a parameter prefix.
pub type HeadFactory =
    Box<dyn Fn(&HeadSpec, VarBuilder) -> Result<Box<dyn ArrayHead>> + Send + Sync>;

/// Registered extractor.
pub struct ExtractorEntry {
    /// Layout of the features this extractor produces.
    pub layout: FeatureLayout,
    /// Constructor.
    pub factory: ExtractorFactory,
}

/// Registered head.
pub struct HeadEntry {
    /// Layout the head consumes.
    pub layout: FeatureLayout,
    /// Constructor.
    pub factory: HeadFactory,
}

/// Registry mapping component names to factories.
pub struct ComponentRegistry {
    extractors: HashMap<String, ExtractorEntry>,
    heads: HashMap<String, HeadEntry>,
}

impl ComponentRegistry {
    /// Registry with no components.
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
            heads: HashMap::new(),
        }
    }

    /// Registry holding every built-in extractor and head.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        registry.register_extractor("alexnet", FeatureLayout::FeatureMap, |shape, vb| {
            Ok(Box::new(blocks::alexnet::AlexNetBlock::new(shape, vb)?))
        });
        registry.register_extractor("mobilenet", FeatureLayout::FeatureMap, |shape, vb| {
            Ok(Box::new(blocks::mobilenet::MobileNetBlock::new(shape, vb)?))
        });
        registry.register_extractor("resnet", FeatureLayout::FeatureMap, |shape, vb| {
            Ok(Box::new(blocks::resnet::ResNetBlock::new(shape, vb)?))
        });
        registry.register_extractor("identity", FeatureLayout::FeatureMap, |shape, _vb| {
            Ok(Box::new(blocks::baseline::IdentityBlock::new(shape)))
        });
        registry.register_extractor("sumpool", FeatureLayout::Vector, |shape, _vb| {
            Ok(Box::new(blocks::baseline::SumPoolBlock::new(shape)))
        });

        registry.register_head("alexnet", FeatureLayout::FeatureMap, |spec, vb| {
            Ok(Box::new(blocks::alexnet::AlexNetHead::new(spec, vb)?))
        });
        registry.register_head("mobilenet", FeatureLayout::FeatureMap, |spec, vb| {
            Ok(Box::new(blocks::mobilenet::MobileNetHead::new(spec, vb)?))
        });
        registry.register_head("resnet", FeatureLayout::FeatureMap, |spec, vb| {
            Ok(Box::new(blocks::resnet::ResNetHead::new(spec, vb)?))
        });
        registry.register_head("resnetfeaturevector", FeatureLayout::Vector, |spec, vb| {
            Ok(Box::new(blocks::resnet::ResNetFeatureVectorHead::new(spec, vb)?))
        });

        registry
    }

    /// Register (or replace) an extractor under `name`.
    pub fn register_extractor<F>(
        &mut self,
        name: impl Into<String>,
        layout: FeatureLayout,
        factory: F,
    ) where
        F: Fn(ImageShape, VarBuilder) -> Result<Box<dyn TelescopeExtractor>>
            + Send
            + Sync
            + 'static,
    {
        self.extractors.insert(
            name.into(),
            ExtractorEntry {
                layout,
                factory: Box::new(factory),
            },
        );
    }

    /// Register (or replace) a head under `name`.
    pub fn register_head<F>(&mut self, name: impl Into<String>, layout: FeatureLayout, factory: F)
    where
        F: Fn(&HeadSpec, VarBuilder) -> Result<Box<dyn ArrayHead>> + Send + Sync + 'static,
    {
        self.heads.insert(
            name.into(),
            HeadEntry {
                layout,
                factory: Box::new(factory),
            },
        );
    }

    /// Look up an extractor.
    ///
    /// # Errors
    ///
    /// Returns [`CtaLearnError::Config`] naming the registered extractors when
    /// `name` is unknown.
    pub fn extractor(&self, name: &str) -> Result<&ExtractorEntry> {
        self.extractors.get(name).ok_or_else(|| {
            CtaLearnError::Config(format!(
                "unknown cnn_block '{name}' (registered: {})",
                self.extractor_names().join(", ")
            ))
        })
    }

    /// Look up a head.
    ///
    /// # Errors
    ///
    /// Returns [`CtaLearnError::Config`] naming the registered heads when
    /// `name` is unknown.
    pub fn head(&self, name: &str) -> Result<&HeadEntry> {
        self.heads.get(name).ok_or_else(|| {
            CtaLearnError::Config(format!(
                "unknown network_head '{name}' (registered: {})",
                self.head_names().join(", ")
            ))
        })
    }

    /// Sorted extractor names.
    pub fn extractor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted head names.
    pub fn head_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.heads.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
