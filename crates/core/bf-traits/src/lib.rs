//! Core traits for batchflow.
//!
//! This crate defines the collaborator seams around the prefetch core:
//! - [`BatchProducer`] - Fills pooled batches (decoding, augmentation)
//! - [`ComputeStep`] - Consumes one ready batch per step

pub mod producer;
pub mod step;

pub use producer::*;
pub use step::*;
