//! Variable-input array models for imaging atmospheric Cherenkov telescope events.
//!
//! An event is a set of per-telescope sensor images plus a trigger flag per
//! telescope. The [`VariableInputModel`] runs every telescope image through one
//! shared-weight [`TelescopeExtractor`], zeroes the output of telescopes that did
//! not trigger, fuses the per-telescope features together with each telescope's
//! position and trigger flag, and hands the array-level tensor to an
//! [`ArrayHead`] that produces class logits.
//!
//! # Architecture
//!
//! ```text
//! telescope_data [B, N, W, H, C] ─┐
//! telescope_triggers [B, N] ──────┼─► per telescope i: extractor(image_i, trigger_i)
//!                                 │                     └─► mask (trigger_i != 0)
//! telescope_positions [N, A] ─────┴─► fusion (vector | featuremap)
//!                                           └─► head ─► logits [B, K] ─► loss
//! ```
//!
//! Extractors and heads are resolved by name from a [`ComponentRegistry`]
//! once, at model construction; unknown names and incompatible
//! fusion/head combinations fail before any parameter is allocated.

pub mod blocks;
pub mod component;
pub mod device;
pub mod fusion;
pub mod inputs;
pub mod loss;
pub mod masking;
pub mod model;
pub mod registry;

pub use component::{ArrayHead, FeatureLayout, HeadSpec, TelescopeExtractor};
pub use device::select_device;
pub use inputs::{class_indices, FeatureBundle, IngestedBatch, LabelBundle};
pub use model::{ModelOutput, VariableInputModel};
pub use registry::ComponentRegistry;

use ctalearn_core::CtaLearnError;

/// Wrap a candle error with a description of the operation that failed.
pub(crate) fn candle_err(context: &'static str) -> impl Fn(candle_core::Error) -> CtaLearnError {
    move |e| CtaLearnError::Model(format!("{context}: {e}"))
}
