//! OCI layer blobs and their uncompressed content.

use std::collections::BTreeMap;
use std::io::Read;

use a3s_stargz_core::error::{OptimizeError, Result};
use flate2::read::MultiGzDecoder;
use oci_spec::image::MediaType;

use super::manifest::{media_types, sha256_digest, Descriptor};

/// Compression applied to a layer blob, derived from its media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerCompression {
    None,
    Gzip,
    Zstd,
}

impl LayerCompression {
    pub fn from_media_type(media_type: &str) -> Result<Self> {
        match media_type {
            media_types::DOCKER_LAYER | media_types::DOCKER_FOREIGN_LAYER => {
                return Ok(Self::Gzip)
            }
            media_types::DOCKER_UNCOMPRESSED_LAYER => return Ok(Self::None),
            _ => {}
        }
        match MediaType::from(media_type) {
            MediaType::ImageLayer => Ok(Self::None),
            MediaType::ImageLayerGzip => Ok(Self::Gzip),
            MediaType::ImageLayerZstd => Ok(Self::Zstd),
            // Non-distributable and vendor variants still spell out their encoding.
            _ if media_type.ends_with("+gzip") || media_type.ends_with(".gzip") => Ok(Self::Gzip),
            _ if media_type.ends_with("+zstd") => Ok(Self::Zstd),
            _ if media_type.ends_with(".tar") => Ok(Self::None),
            _ => Err(OptimizeError::ImageReadError(format!(
                "Unsupported layer media type: {}",
                media_type
            ))),
        }
    }
}

/// A single image layer held in memory.
#[derive(Debug, Clone)]
pub struct Layer {
    media_type: String,
    digest: String,
    blob: Vec<u8>,
    diff_id: Option<String>,
    annotations: Option<BTreeMap<String, String>>,
}

impl Layer {
    /// Wrap a (possibly compressed) layer blob.
    pub fn from_blob(media_type: impl Into<String>, blob: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            digest: sha256_digest(&blob),
            blob,
            diff_id: None,
            annotations: None,
        }
    }

    /// Record the digest of the uncompressed content.
    pub fn with_diff_id(mut self, diff_id: impl Into<String>) -> Self {
        self.diff_id = Some(diff_id.into());
        self
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = if annotations.is_empty() {
            None
        } else {
            Some(annotations)
        };
        self
    }

    /// Same content, different media type tag.
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.blob.len() as u64
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn diff_id(&self) -> Option<&str> {
        self.diff_id.as_deref()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.annotations.as_ref()
    }

    /// Open the uncompressed tar stream of this layer.
    pub fn uncompressed(&self) -> Result<Box<dyn Read + '_>> {
        let reader: Box<dyn Read + '_> = match LayerCompression::from_media_type(&self.media_type)? {
            LayerCompression::None => Box::new(self.blob.as_slice()),
            LayerCompression::Gzip => Box::new(MultiGzDecoder::new(self.blob.as_slice())),
            LayerCompression::Zstd => {
                Box::new(zstd::stream::read::Decoder::new(self.blob.as_slice()).map_err(|e| {
                    OptimizeError::ImageReadError(format!(
                        "Failed to open zstd layer {}: {}",
                        self.digest, e
                    ))
                })?)
            }
        };
        Ok(reader)
    }

    /// Descriptor for this layer in a manifest.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            media_type: self.media_type.clone(),
            digest: self.digest.clone(),
            size: self.size(),
            urls: None,
            annotations: self.annotations.clone(),
            platform: None,
        }
    }
}
