//! OCI image model and registry access.
//!
//! This module provides the in-memory view of images and indexes used by
//! the optimizer, plus a registry client. It supports:
//!
//! - Docker schema 2 and OCI manifests, manifest lists and image indexes
//! - Layer blobs compressed with gzip or zstd, or left as plain tar
//! - Fetching and publishing through the [`Fetcher`] and [`Publisher`] seams
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  get / image   ┌────────────────────┐
//! │   Optimizer  │ ─────────────▶ │      Fetcher       │
//! │              │                │  (RegistryClient)  │
//! │              │  write_image   ├────────────────────┤
//! │              │  write_index   │     Publisher      │
//! │              │ ─────────────▶ │  (RegistryClient)  │
//! └──────────────┘                └────────────────────┘
//! ```

mod image;
mod layers;
pub mod manifest;
pub mod reference;
pub mod registry;
pub mod remote;

pub use image::{Image, ImageIndex, IndexEntry};
pub use layers::{Layer, LayerCompression};
pub use manifest::{media_types, ConfigFile, Descriptor, IndexManifest, Manifest, ManifestKind, Platform};
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryClient};
pub use remote::{Fetcher, Publisher, PushResult, RemoteDescriptor, RemoteIndex};
