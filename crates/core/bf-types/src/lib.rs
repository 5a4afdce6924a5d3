//! Core data types for batchflow.
//!
//! - [`Blob`] - resizable `f32` buffer with a host copy and an optional device mirror
//! - [`Batch`] - pooled unit of prefetched data and labels
//! - [`Device`] / [`TransferStream`] - accelerator runtime seam used for staging

pub mod batch;
pub mod blob;
pub mod device;

pub use batch::Batch;
pub use blob::{Blob, Residency};
pub use device::{Device, DeviceBuffer, HostMirrorDevice, TransferStream};
