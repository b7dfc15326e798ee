//! A3S Stargz Runtime - image optimizer implementation.
//!
//! This crate provides the OCI image model, a registry client, the eStargz
//! layer encoder and the optimizer that ties them together.

#![allow(clippy::result_large_err)]

pub mod oci;
pub mod optimize;
pub mod stargz;

// Re-export common types
pub use oci::{Fetcher, Image, ImageIndex, ImageReference, Layer, Platform, Publisher, PushResult};
pub use oci::{RegistryAuth, RegistryClient, RemoteDescriptor, RemoteIndex};
pub use optimize::{Optimizer, Route};
pub use stargz::{read_toc, EncodedLayer, LayerEncoder, StargzEncoder, Toc, TocEntry};

/// A3S Stargz Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
