//! Training pipeline for ctalearn models.
//!
//! - [`trainer`] fits a [`ctalearn_models::VariableInputModel`] on array event datasets.
//! - [`search`] runs a random learning-rate / beta search for a single-image
//!   gamma/hadron classifier.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod history;
pub mod image_classifier;
pub mod metrics;
pub mod search;
pub mod trainer;
